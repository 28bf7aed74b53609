//! roster gateway
//!
//! Single binary that runs:
//! - the `/v1/users` REST API behind the request pipeline
//! - the realtime broadcast endpoint at `/v1/socket`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use roster_common::auth::TokenAuthority;
use roster_gateway::config::Config;
use roster_gateway::gateway::Gateway;
use roster_gateway::state::AppState;
use roster_gateway::store::{MemoryUserStore, UserStore};
use roster_gateway::{api, db};

/// roster user service.
#[derive(Parser, Debug)]
#[command(name = "roster-gateway", about = "roster user service gateway")]
struct Cli {
    /// TOML configuration file. `ROSTER_*` environment variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    // ── Token authority ─────────────────────────────────────────
    let authority = if config.secret_key.is_empty() {
        tracing::warn!("secret_key not set, generating ephemeral secret (tokens will not survive a restart)");
        TokenAuthority::ephemeral(config.token_ttl())
    } else {
        TokenAuthority::new(config.secret_key.as_bytes(), config.token_ttl())
            .context("invalid signing secret")?
    };

    // ── User store ──────────────────────────────────────────────
    let users: Arc<dyn UserStore> = if config.database_url.is_empty() {
        tracing::warn!("database_url not set, users are kept in memory");
        Arc::new(MemoryUserStore::new())
    } else {
        let pool = db::connect(&config.database_url).await?;
        db::migrate(&pool).await?;
        Arc::new(db::PgUserStore::new(pool))
    };

    // ── Gateway ─────────────────────────────────────────────────
    let state = AppState::new(authority, users);
    let mut gateway = Gateway::new(config.server_settings()?, state);
    gateway.register_routes(api::routes())?;

    let running = gateway.start().await?;
    tracing::info!(addr = %running.local_addr(), "roster-gateway started");

    shutdown_signal().await;
    let outcome = running.stop(config.shutdown_grace()).await;
    tracing::info!(?outcome, "roster-gateway stopped");
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for SIGINT: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
