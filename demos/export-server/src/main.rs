//! WebSocket export server.
//!
//! Run with: cargo run -p export-server
//!
//! Drivers connect to ws://localhost:3000/ws and send `start_export`,
//! `stop`, `cancel`, `status` or `ping` messages.

use std::{net::SocketAddr, sync::Arc};

use axum::{Router, routing::get};
use binder_core::BinderConfig;
use binder_robot::TcpConnector;
use binder_session::ExportController;
use binder_transport::websocket::create_ws_router;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = BinderConfig::load()?;
    match &config.robot.host {
        Some(host) => tracing::info!(%host, port = config.robot.script_port, "Default robot"),
        None => tracing::warn!("No robot host configured; requests must name one"),
    }

    let connector = TcpConnector::new(config.robot.stream.connect_timeout());
    let controller = Arc::new(ExportController::new(connector));

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(create_ws_router(controller, config.robot))
        .layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));
    tracing::info!("Server listening on ws://{addr}/ws");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
