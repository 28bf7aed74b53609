//! Route table, request pipeline assembly and listener lifecycle.
//!
//! Routes are validated when registered, so a bad pattern or regex fails at
//! startup. Routes sharing a path and method are grouped behind one
//! dispatcher that checks regex path segments and query constraints; the
//! route with the most query constraints is tried first.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{FromRequestParts, Query, RawPathParams, Request};
use axum::handler::Handler;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, MethodRouter};
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use regex::Regex;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tower::util::BoxCloneSyncService;
use tower::{service_fn, Layer, ServiceExt};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutLayer};

use crate::api::error::ApiError;
use crate::middleware::{self, Stage, PIPELINE};
use crate::state::AppState;

type RouteService = BoxCloneSyncService<Request, Response, Infallible>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("route {route}: invalid pattern {pattern:?}: {reason}")]
    Pattern {
        route: String,
        pattern: String,
        reason: &'static str,
    },
    #[error("route {route}: invalid regex in {pattern:?}: {source}")]
    Regex {
        route: String,
        pattern: String,
        source: regex::Error,
    },
    #[error("route {route}: unsupported method {method}")]
    Method { route: String, method: Method },
    #[error("route {route}: parameter {{{name}}} conflicts with {{{existing}}} at the same position")]
    ParamConflict {
        route: String,
        name: String,
        existing: String,
    },
    #[error("duplicate route name {0}")]
    DuplicateName(String),
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Listener address and slow-client timeouts.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    /// Bound on reading a request body.
    pub read_timeout: Duration,
    /// Bound on producing a response.
    pub write_timeout: Duration,
    /// Bound on waiting for the next request's headers on an open connection.
    pub idle_timeout: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8888)),
            read_timeout: Duration::from_secs(15),
            write_timeout: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

// ── Route definitions ───────────────────────────────────────────────

/// A handler bound to a method, path pattern and optional query constraints.
pub struct Route {
    name: String,
    method: Method,
    pattern: String,
    queries: Vec<(String, String)>,
    secure: bool,
    make_service: Box<dyn FnOnce(AppState) -> RouteService + Send>,
}

impl Route {
    pub fn new<H, T>(name: impl Into<String>, method: Method, pattern: impl Into<String>, handler: H) -> Self
    where
        H: Handler<T, AppState>,
        T: 'static,
    {
        Self {
            name: name.into(),
            method,
            pattern: pattern.into(),
            queries: Vec::new(),
            secure: false,
            make_service: Box::new(move |state| BoxCloneSyncService::new(handler.with_state(state))),
        }
    }

    /// Require query parameters. Each pair is a key and a template: a
    /// literal value, `{name}` or `{name:regex}`.
    pub fn queries(mut self, constraints: &[(&str, &str)]) -> Self {
        self.queries = constraints
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self
    }

    /// Put the route behind bearer authentication.
    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug)]
enum Segment {
    Literal(String),
    Param { name: String, regex: Option<Regex> },
}

#[derive(Debug)]
enum QueryMatcher {
    Literal(String),
    Present,
    Pattern(Regex),
}

#[derive(Debug)]
struct QueryConstraint {
    key: String,
    matcher: QueryMatcher,
}

impl QueryConstraint {
    fn matches(&self, query: &HashMap<String, String>) -> bool {
        let Some(value) = query.get(&self.key) else {
            return false;
        };
        match &self.matcher {
            QueryMatcher::Literal(expected) => value == expected,
            QueryMatcher::Present => true,
            QueryMatcher::Pattern(re) => re.is_match(value),
        }
    }
}

/// A route that passed validation, ready to be mounted.
#[derive(Clone)]
struct CompiledRoute {
    name: String,
    method: Method,
    axum_path: String,
    path_checks: Arc<Vec<(String, Regex)>>,
    queries: Arc<Vec<QueryConstraint>>,
    service: RouteService,
}

impl CompiledRoute {
    fn matches(&self, params: &HashMap<String, String>, query: &HashMap<String, String>) -> bool {
        self.path_checks
            .iter()
            .all(|(name, re)| params.get(name).is_some_and(|v| re.is_match(v)))
            && self.queries.iter().all(|c| c.matches(query))
    }
}

fn is_param_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split `{name}` / `{name:regex}` into its parts. `None` if `raw` is not a
/// placeholder at all.
fn parse_placeholder(raw: &str) -> Option<(&str, Option<&str>)> {
    let inner = raw.strip_prefix('{')?.strip_suffix('}')?;
    Some(match inner.split_once(':') {
        Some((name, re)) => (name, Some(re)),
        None => (inner, None),
    })
}

fn anchored(route: &str, pattern: &str, re: &str) -> Result<Regex, GatewayError> {
    Regex::new(&format!("^(?:{re})$")).map_err(|source| GatewayError::Regex {
        route: route.to_string(),
        pattern: pattern.to_string(),
        source,
    })
}

fn parse_path(route: &str, pattern: &str) -> Result<Vec<Segment>, GatewayError> {
    let invalid = |reason| GatewayError::Pattern {
        route: route.to_string(),
        pattern: pattern.to_string(),
        reason,
    };

    let rest = pattern
        .strip_prefix('/')
        .ok_or_else(|| invalid("must start with '/'"))?;
    if rest.is_empty() {
        return Ok(Vec::new());
    }

    rest.split('/')
        .map(|raw| {
            if raw.is_empty() {
                return Err(invalid("empty path segment"));
            }
            match parse_placeholder(raw) {
                Some((name, re)) => {
                    if !is_param_name(name) {
                        return Err(invalid("parameter names are alphanumeric or '_'"));
                    }
                    let regex = match re {
                        Some("") => return Err(invalid("empty parameter regex")),
                        Some(re) => Some(anchored(route, pattern, re)?),
                        None => None,
                    };
                    Ok(Segment::Param {
                        name: name.to_string(),
                        regex,
                    })
                }
                None if raw.contains(['{', '}']) => Err(invalid("unsupported placeholder syntax")),
                None => Ok(Segment::Literal(raw.to_string())),
            }
        })
        .collect()
}

fn parse_query(route: &str, key: &str, template: &str) -> Result<QueryConstraint, GatewayError> {
    let pattern = format!("{key}={template}");
    let invalid = |reason| GatewayError::Pattern {
        route: route.to_string(),
        pattern: pattern.clone(),
        reason,
    };

    if key.is_empty() || key.contains(['{', '}', '=', '&']) {
        return Err(invalid("query keys are plain, non-empty names"));
    }
    let matcher = match parse_placeholder(template) {
        Some((name, re)) => {
            if !is_param_name(name) {
                return Err(invalid("parameter names are alphanumeric or '_'"));
            }
            match re {
                Some("") => return Err(invalid("empty parameter regex")),
                Some(re) => QueryMatcher::Pattern(anchored(route, &pattern, re)?),
                None => QueryMatcher::Present,
            }
        }
        None if template.contains(['{', '}']) => return Err(invalid("unsupported placeholder syntax")),
        None => QueryMatcher::Literal(template.to_string()),
    };
    Ok(QueryConstraint {
        key: key.to_string(),
        matcher,
    })
}

// ── Gateway ─────────────────────────────────────────────────────────

pub struct Gateway {
    settings: ServerSettings,
    state: AppState,
    routes: Vec<CompiledRoute>,
    /// Parameter name bound at each templated position, keyed by the
    /// normalized path prefix ending at that position.
    param_names: HashMap<String, String>,
}

impl Gateway {
    pub fn new(settings: ServerSettings, state: AppState) -> Self {
        Self {
            settings,
            state,
            routes: Vec::new(),
            param_names: HashMap::new(),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Validate `route` and add it to the table.
    pub fn register_route(&mut self, route: Route) -> Result<(), GatewayError> {
        if self.routes.iter().any(|r| r.name == route.name) {
            return Err(GatewayError::DuplicateName(route.name));
        }
        if MethodFilter::try_from(route.method.clone()).is_err() {
            return Err(GatewayError::Method {
                route: route.name,
                method: route.method,
            });
        }

        let segments = parse_path(&route.name, &route.pattern)?;
        let queries = route
            .queries
            .iter()
            .map(|(k, v)| parse_query(&route.name, k, v))
            .collect::<Result<Vec<_>, _>>()?;

        let mut axum_path = String::new();
        let mut normalized = String::new();
        let mut path_checks = Vec::new();
        let mut bindings = Vec::new();
        for segment in segments {
            match segment {
                Segment::Literal(lit) => {
                    axum_path.push('/');
                    axum_path.push_str(&lit);
                    normalized.push('/');
                    normalized.push_str(&lit);
                }
                Segment::Param { name, regex } => {
                    axum_path.push_str(&format!("/{{{name}}}"));
                    normalized.push_str("/{}");
                    match self.param_names.get(&normalized) {
                        Some(existing) if *existing != name => {
                            return Err(GatewayError::ParamConflict {
                                route: route.name,
                                name,
                                existing: existing.clone(),
                            });
                        }
                        Some(_) => {}
                        None => bindings.push((normalized.clone(), name.clone())),
                    }
                    if let Some(re) = regex {
                        path_checks.push((name, re));
                    }
                }
            }
        }
        if axum_path.is_empty() {
            axum_path.push('/');
        }
        self.param_names.extend(bindings);

        let mut service = (route.make_service)(self.state.clone());
        if route.secure {
            service = BoxCloneSyncService::new(
                from_fn_with_state(self.state.clone(), middleware::authenticate).layer(service),
            );
        }

        tracing::debug!(
            route = %route.name,
            method = %route.method,
            path = %route.pattern,
            secure = route.secure,
            "route registered"
        );
        self.routes.push(CompiledRoute {
            name: route.name,
            method: route.method,
            axum_path,
            path_checks: Arc::new(path_checks),
            queries: Arc::new(queries),
            service,
        });
        Ok(())
    }

    pub fn register_routes(&mut self, routes: impl IntoIterator<Item = Route>) -> Result<(), GatewayError> {
        routes.into_iter().try_for_each(|route| self.register_route(route))
    }

    /// Assemble the route table and wrap it in the request pipeline.
    pub fn router(&self) -> Router {
        let mut groups: Vec<PathGroup<'_>> = Vec::new();
        for route in &self.routes {
            let idx = match groups.iter().position(|g| g.path == route.axum_path) {
                Some(idx) => idx,
                None => {
                    groups.push(PathGroup::new(&route.axum_path));
                    groups.len() - 1
                }
            };
            let methods = &mut groups[idx].methods;
            match methods.iter_mut().find(|(m, _)| **m == route.method) {
                Some((_, candidates)) => candidates.push(route.clone()),
                None => methods.push((&route.method, vec![route.clone()])),
            }
        }
        for group in &mut groups {
            for (_, candidates) in &mut group.methods {
                candidates.sort_by_key(|c| std::cmp::Reverse(c.queries.len()));
            }
        }

        let members: Vec<usize> = (0..groups.len()).collect();
        let app = route_table(&groups, &members);

        let mut app = app
            .fallback(not_found)
            .layer(TimeoutLayer::new(self.settings.write_timeout))
            .layer(RequestBodyTimeoutLayer::new(self.settings.read_timeout));

        for stage in PIPELINE.iter().rev() {
            app = match stage {
                Stage::Recovery => app.layer(from_fn(middleware::recover)),
                Stage::ResponseShaping => app.layer(SetResponseHeaderLayer::overriding(
                    CONTENT_TYPE,
                    middleware::json_content_type(),
                )),
                Stage::Identification => app.layer(from_fn(middleware::identify)),
                // Mounted per secure route in `register_route`.
                Stage::Authentication => app,
            };
        }
        app
    }

    /// Bind the listener and serve in the background.
    pub async fn start(self) -> Result<RunningGateway, GatewayError> {
        let app = self.router();
        let addr = self.settings.addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| GatewayError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(serve(listener, app, self.settings.idle_timeout, shutdown_rx));

        tracing::info!(addr = %local_addr, routes = self.routes.len(), "gateway listening");
        Ok(RunningGateway {
            local_addr,
            state: self.state,
            shutdown_tx,
            server,
        })
    }
}

/// Routes sharing one axum path, grouped by method.
struct PathGroup<'a> {
    path: &'a str,
    /// `Some(literal)` or `None` for a parameter, per segment.
    shape: Vec<Option<&'a str>>,
    methods: Vec<(&'a Method, Vec<CompiledRoute>)>,
}

impl<'a> PathGroup<'a> {
    fn new(path: &'a str) -> Self {
        let shape = path
            .split('/')
            .skip(1)
            .filter(|seg| !seg.is_empty())
            .map(|seg| (!seg.starts_with('{')).then_some(seg))
            .collect();
        Self {
            path,
            shape,
            methods: Vec::new(),
        }
    }

    /// Whether some request path is matched by both groups.
    fn overlaps(&self, other: &PathGroup<'_>) -> bool {
        self.shape.len() == other.shape.len()
            && self
                .shape
                .iter()
                .zip(&other.shape)
                .all(|(a, b)| match (a, b) {
                    (Some(a), Some(b)) => a == b,
                    _ => true,
                })
    }
}

/// Mount `members` of `groups`. axum prefers static segments, so
/// `/v1/users/login` hides `/v1/users/{account}` for every method. When the
/// preferred path has no handler for the method, the request is retried
/// against the other paths that also match it, and only then answered
/// with method-not-allowed.
fn route_table(groups: &[PathGroup<'_>], members: &[usize]) -> Router {
    let mut app = Router::new();
    for &i in members {
        let group = &groups[i];
        let mut method_router = MethodRouter::new();
        for (method, candidates) in &group.methods {
            let Ok(filter) = MethodFilter::try_from((*method).clone()) else {
                continue;
            };
            method_router = method_router.on_service(filter, dispatcher(candidates.clone()));
        }

        let overlapping: Vec<usize> = members
            .iter()
            .copied()
            .filter(|&j| j != i && group.overlaps(&groups[j]))
            .collect();
        method_router = if overlapping.is_empty() {
            method_router.fallback(method_not_allowed)
        } else {
            method_router.fallback_service(route_table(groups, &overlapping).fallback(method_not_allowed))
        };
        app = app.route(group.path, method_router);
    }
    app
}

/// One service per (path, method): the first candidate whose regex
/// segments and query constraints match handles the request.
fn dispatcher(candidates: Vec<CompiledRoute>) -> RouteService {
    let candidates = Arc::new(candidates);
    BoxCloneSyncService::new(service_fn(move |req: Request| {
        let candidates = Arc::clone(&candidates);
        async move {
            let (mut parts, body) = req.into_parts();
            let params: HashMap<String, String> = RawPathParams::from_request_parts(&mut parts, &())
                .await
                .map(|raw| raw.iter().map(|(k, v)| (k.to_owned(), v.to_owned())).collect())
                .unwrap_or_default();
            let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
                .map(|Query(q)| q)
                .unwrap_or_default();

            let Some(route) = candidates.iter().find(|c| c.matches(&params, &query)) else {
                return Ok(ApiError::not_found().into_response());
            };
            tracing::debug!(route = %route.name, "route matched");
            route
                .service
                .clone()
                .oneshot(Request::from_parts(parts, body))
                .await
        }
    }))
}

async fn not_found() -> ApiError {
    ApiError::not_found()
}

async fn method_not_allowed() -> ApiError {
    ApiError::method_not_allowed()
}

// ── Lifecycle ───────────────────────────────────────────────────────

/// How [`RunningGateway::stop`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every in-flight request finished before the deadline.
    Graceful,
    /// Connections still open at the deadline were aborted.
    Forced,
}

/// Handle to a gateway serving in the background.
pub struct RunningGateway {
    local_addr: SocketAddr,
    state: AppState,
    shutdown_tx: watch::Sender<bool>,
    server: JoinHandle<()>,
}

impl RunningGateway {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Stop accepting, close realtime connections and give in-flight
    /// requests up to `deadline` to finish.
    pub async fn stop(self, deadline: Duration) -> ShutdownOutcome {
        let _ = self.shutdown_tx.send(true);
        let closed = self.state.registry().close_all();
        tracing::info!(realtime_connections = closed, "gateway shutting down");

        let mut server = self.server;
        match tokio::time::timeout(deadline, &mut server).await {
            Ok(Ok(())) => {
                tracing::info!("gateway stopped");
                ShutdownOutcome::Graceful
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "server task failed");
                ShutdownOutcome::Forced
            }
            Err(_) => {
                server.abort();
                tracing::warn!(?deadline, "shutdown deadline passed, connections aborted");
                ShutdownOutcome::Forced
            }
        }
    }
}

/// Accept loop. Every connection is tracked so shutdown can drain it, and
/// dropping this future aborts whatever is still running.
async fn serve(listener: TcpListener, app: Router, idle_timeout: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(idle_timeout);

    let graceful = GracefulShutdown::new();
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        continue;
                    }
                };
                let service = TowerToHyperService::new(app.clone());
                let conn = builder
                    .serve_connection_with_upgrades(TokioIo::new(stream), service)
                    .into_owned();
                let conn = graceful.watch(conn);
                connections.spawn(async move {
                    if let Err(e) = conn.await {
                        tracing::debug!(peer = %peer, error = %e, "connection ended with error");
                    }
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown.changed() => break,
        }
    }

    drop(listener);
    tracing::debug!(open = connections.len(), "listener closed, draining connections");
    graceful.shutdown().await;
    while connections.join_next().await.is_some() {}
}
