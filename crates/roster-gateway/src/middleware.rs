//! The request pipeline.
//!
//! Every request passes through the stages of [`PIPELINE`] in order,
//! outermost first:
//!
//! 1. **Recovery** catches any panic from the stages below and answers with
//!    a generic 500.
//! 2. **Response shaping** forces `content-type: application/json`.
//! 3. **Identification** assigns a correlation ID, stores it in the
//!    [`RequestContext`] and writes the access log line.
//! 4. **Authentication** runs only on secure routes and attaches the
//!    verified identity to the [`RequestContext`].
//!
//! The gateway walks [`PIPELINE`] when it assembles the router, so the order
//! here is the order at runtime.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use axum::extract::{FromRequestParts, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use tracing::Instrument;

use roster_common::ids;

use crate::api::error::ApiError;
use crate::state::AppState;

/// Response header carrying the correlation ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// One interceptor in the request pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Recovery,
    ResponseShaping,
    Identification,
    /// Applied per route, only where the route is marked secure.
    Authentication,
}

/// Pipeline order, outermost first.
pub const PIPELINE: [Stage; 4] = [
    Stage::Recovery,
    Stage::ResponseShaping,
    Stage::Identification,
    Stage::Authentication,
];

impl Stage {
    /// Whether the stage wraps every request or only secure routes.
    pub fn is_per_route(self) -> bool {
        matches!(self, Stage::Authentication)
    }
}

tokio::task_local! {
    static REQUEST_ID: String;
}

/// Correlation ID of the request being served on this task, if any.
pub fn current_request_id() -> Option<String> {
    REQUEST_ID.try_with(|id| id.clone()).ok()
}

// ── Request context ─────────────────────────────────────────────────

/// Per-request data shared with handlers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    /// Set by the authentication stage on secure routes.
    pub identity: Option<String>,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            identity: None,
        }
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or_else(|| ApiError::internal("request context missing; identification stage not applied"))
    }
}

/// Extractor for handlers that need the authenticated identity.
#[derive(Debug, Clone)]
pub struct Identity(pub String);

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .and_then(|ctx| ctx.identity.clone())
            .map(Identity)
            .ok_or_else(ApiError::unauthenticated)
    }
}

// ── Recovery ────────────────────────────────────────────────────────

/// Lets the recovery stage learn the correlation ID assigned further in.
#[derive(Debug, Clone, Default)]
struct CorrelationSlot(Arc<OnceLock<String>>);

pub async fn recover(mut req: Request, next: Next) -> Response {
    let slot = CorrelationSlot::default();
    req.extensions_mut().insert(slot.clone());
    let method = req.method().clone();
    let path = req.uri().path().to_owned();

    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            let request_id = slot.0.get().cloned().unwrap_or_default();
            tracing::error!(
                request_id = %request_id,
                method = %method,
                path = %path,
                fault = %panic_message(panic.as_ref()),
                "recovered from application fault"
            );
            let mut response = ApiError::internal_fault().into_response_with_id(request_id.clone());
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                response.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
            response
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

// ── Response shaping ────────────────────────────────────────────────

pub fn json_content_type() -> HeaderValue {
    HeaderValue::from_static("application/json")
}

// ── Identification & access log ─────────────────────────────────────

pub async fn identify(mut req: Request, next: Next) -> Response {
    let request_id = ids::request_id();
    if let Some(slot) = req.extensions().get::<CorrelationSlot>() {
        let _ = slot.0.set(request_id.clone());
    }
    req.extensions_mut()
        .insert(RequestContext::new(request_id.clone()));

    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let span = tracing::info_span!("request", request_id = %request_id, method = %method, path = %path);
    let started = Instant::now();

    let mut response = REQUEST_ID
        .scope(request_id.clone(), next.run(req))
        .instrument(span)
        .await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_secs_f64() * 1000.0,
        "request completed"
    );
    response
}

// ── Authentication ──────────────────────────────────────────────────

/// Pull the token out of `Authorization: Bearer <token>`.
fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

pub async fn authenticate(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let Some(token) = bearer_token(&req) else {
        tracing::warn!("missing or malformed authorization header");
        return ApiError::unauthenticated().into_response();
    };

    let identity = match state.authority().verify(token) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(error = %e, "bearer token rejected");
            return ApiError::unauthenticated().into_response();
        }
    };

    match req.extensions_mut().get_mut::<RequestContext>() {
        Some(ctx) => ctx.identity = Some(identity),
        None => {
            let mut ctx = RequestContext::new(current_request_id().unwrap_or_default());
            ctx.identity = Some(identity);
            req.extensions_mut().insert(ctx);
        }
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_order_is_fixed() {
        assert_eq!(
            PIPELINE,
            [
                Stage::Recovery,
                Stage::ResponseShaping,
                Stage::Identification,
                Stage::Authentication
            ]
        );
        assert_eq!(PIPELINE.iter().filter(|s| s.is_per_route()).count(), 1);
        assert_eq!(PIPELINE.last().copied(), Some(Stage::Authentication));
    }

    #[test]
    fn bearer_token_parsing() {
        let with = |value: &str| {
            Request::builder()
                .header(AUTHORIZATION, value)
                .body(axum::body::Body::empty())
                .unwrap()
        };

        assert_eq!(bearer_token(&with("Bearer abc.def")), Some("abc.def"));
        assert_eq!(bearer_token(&with("Bearer   abc ")), Some("abc"));
        assert_eq!(bearer_token(&with("Bearer ")), None);
        assert_eq!(bearer_token(&with("Basic dXNlcjpwdw==")), None);
        assert_eq!(bearer_token(&with("abc.def")), None);

        let bare = Request::builder().body(axum::body::Body::empty()).unwrap();
        assert_eq!(bearer_token(&bare), None);
    }

    #[test]
    fn panic_payloads_are_described() {
        let s: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(s.as_ref()), "boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("kaboom"));
        assert_eq!(panic_message(owned.as_ref()), "kaboom");
        let other: Box<dyn Any + Send> = Box::new(7_u32);
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }

    #[tokio::test]
    async fn request_id_visible_only_inside_scope() {
        assert!(current_request_id().is_none());
        let seen = REQUEST_ID
            .scope("req_test".to_string(), async { current_request_id() })
            .await;
        assert_eq!(seen.as_deref(), Some("req_test"));
    }
}
