//! HTTP query API.

pub mod error;
pub mod handlers;
pub mod rate_limit;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::Method;
use axum::middleware;
use axum::routing::get;
use axum::Router;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use handlers::{
    handle_channel_mapping, handle_guild_mapping, handle_healthy, handle_messages, AppState,
};
use rate_limit::{limit_requests, RateLimiter};

/// Builds the API router with rate limiting, CORS and request tracing.
pub fn router(state: AppState, limiter: Arc<RateLimiter>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST]);

    Router::new()
        .route("/messages", get(handle_messages))
        .route("/api/messages", get(handle_messages))
        .route("/mappings/guilds", get(handle_guild_mapping))
        .route("/mappings/channels", get(handle_channel_mapping))
        .route("/-/healthy", get(handle_healthy))
        .layer(middleware::from_fn_with_state(limiter, limit_requests))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct QueryServer {
    state: AppState,
    limiter: Arc<RateLimiter>,
    port: u16,
}

impl QueryServer {
    pub fn new(state: AppState, limiter: Arc<RateLimiter>, port: u16) -> Self {
        Self {
            state,
            limiter,
            port,
        }
    }

    /// Serves until SIGINT or SIGTERM.
    pub async fn run(self) -> anyhow::Result<()> {
        let app = router(self.state, self.limiter);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Server running on {}", addr);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        info!("Server shut down gracefully");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, starting graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, starting graceful shutdown"),
    }
}
