//! HTTP server implementation using Axum.

use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use matsuri_channels::{DiscordAnnouncer, LineChannel};
use matsuri_core::config::GatewayConfig;
use matsuri_core::traits::EventStore;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EventStore>,
    pub line: Arc<LineChannel>,
    pub announcer: Arc<DiscordAnnouncer>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(super::routes::health_check))
        .route("/webhook", post(super::routes::line_webhook))
        .route(
            "/api/v1/events",
            get(super::routes::list_events).post(super::routes::upsert_event),
        )
        .route(
            "/api/v1/events/{source_id}",
            delete(super::routes::cancel_event),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server. Runs until the process shuts down.
pub async fn start(config: &GatewayConfig, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Gateway listening on http://{addr}");

    axum::serve(listener, app).await?;
    Ok(())
}
