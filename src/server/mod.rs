//! HTTP read API over the usage monitor, plus the embedded dashboard.

pub mod handlers;
pub mod router;
pub mod static_files;

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::core::monitor::UsageMonitor;

pub struct ServeOptions {
    pub host: String,
    pub port: u16,
    pub refresh_on_start: bool,
}

/// Bind and serve until Ctrl-C.
pub async fn serve(options: ServeOptions, monitor: Arc<UsageMonitor>) -> Result<()> {
    if options.refresh_on_start {
        match monitor.refresh_all().await {
            Ok(summary) => tracing::info!("initial refresh: {} services", summary.services.len()),
            Err(e) => tracing::warn!("initial refresh failed: {}", e),
        }
    }

    let app = router::create_router(monitor);
    let addr = format!("{}:{}", options.host, options.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("serving on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
