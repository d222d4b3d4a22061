mod config;

use anyhow::Result;
use drop_axum::DropApp;
use drop_store::DropService;
use tokio::signal;

use crate::config::DropConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = DropConfig::with_defaults();
    config.load_env();

    let default_filter = if config.debug_logging() {
        "drop_server=debug,drop_store=debug,drop_axum=debug,tower_http=debug"
    } else {
        "drop_server=info,drop_store=info,drop_axum=info,tower_http=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let server = config.server()?;
    let store = config.store()?;

    tracing::info!("Starting drop server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        content_dir = %store.content_dir.display(),
        max_bytes_per_file = store.max_bytes_per_file,
        max_bytes_total = store.max_bytes_total,
        minutes_per_gigabyte = store.minutes_per_gigabyte,
        "store configured"
    );

    let service = DropService::new(store)?;
    let retention = service.spawn_retention();

    let app = DropApp::new(service, &server.public_url);
    app.listen(server.addr(), shutdown_signal()).await?;

    retention.abort();
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
