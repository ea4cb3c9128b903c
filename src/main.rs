//! Invigil - Multi-Camera Exam Monitoring Orchestrator
//!
//! Main entry point for the monitoring agent.

use invigil::{
    annotation_client::HttpProcessingClient,
    capture_loop::stub::StubCaptureProvider,
    hub::DisplayHub,
    session::SessionManager,
    state::{AppConfig, AppState},
    web_api,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "invigil=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Invigil v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        processor_url = %config.processor_url,
        capture_interval_ms = config.capture_interval_ms,
        jpeg_quality = config.jpeg_quality,
        "Configuration loaded"
    );

    // Initialize components
    let backend = Arc::new(HttpProcessingClient::new(config.processor_url.clone()));
    let hub = Arc::new(DisplayHub::new());
    // Synthetic capture source until a hardware integration is wired in
    let capture = Arc::new(StubCaptureProvider::new());
    let manager = Arc::new(SessionManager::new(
        backend.clone(),
        capture,
        hub.clone(),
        Duration::from_millis(config.capture_interval_ms),
        config.jpeg_quality,
    ));

    if backend.health_check().await {
        tracing::info!("Video processor reachable");
    } else {
        tracing::warn!(
            processor_url = %config.processor_url,
            "Video processor not reachable at startup; sessions will fail until it is"
        );
    }

    let state = AppState {
        config: config.clone(),
        backend,
        manager,
        hub,
    };

    // Build router and start server
    let app = web_api::create_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}
