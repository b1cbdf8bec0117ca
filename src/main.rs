use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{prelude::*, EnvFilter};

use mjpegd::app::AppState;
use mjpegd::config::{CliArgs, ServerConfig};
use mjpegd::web::create_router;

fn init_logging(config: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter()));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let config = ServerConfig::from(args);
    init_logging(&config);

    tracing::info!(camera = %config.camera_path, port = config.port, "starting mjpegd");

    let state = Arc::new(AppState::new(config.clone()).map_err(|e| {
        tracing::error!(error = %e, "failed to open capture device");
        anyhow::anyhow!(e)
    })?);

    let app = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received SIGINT, shutting down"),
        Err(e) => tracing::error!(error = %e, "failed to install SIGINT handler"),
    }
}
