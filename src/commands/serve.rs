use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use crate::bot::build_controller;
use crate::config::BotConfig;
use crate::control_api::build_router;
use crate::supervisor::{BotStatus, Supervisor};

/// Serve the control API; the bot runs only between `/start` and `/stop`
pub async fn execute(config: BotConfig, addr: SocketAddr, autostart: bool) -> Result<()> {
    let stop_grace = config.stop_grace;
    let supervisor = Arc::new(Supervisor::new(
        Arc::new(move || build_controller(&config)),
        stop_grace,
    ));

    if autostart {
        supervisor
            .start()
            .await
            .context("Failed to start bot on launch")?;
    }

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind control API to {addr}"))?;
    info!(
        "Control API listening on http://{addr}",
        addr = listener.local_addr().unwrap_or(addr)
    );

    axum::serve(listener, build_router(supervisor.clone()))
        .with_graceful_shutdown(async {
            let _ = signal::ctrl_c().await;
            info!("Received shutdown signal (Ctrl+C)");
        })
        .await
        .context("Control API server failed")?;

    if supervisor.status() == BotStatus::Running {
        if let Err(e) = supervisor.stop().await {
            warn!("Failed to stop bot during shutdown: {e}");
        }
    }

    info!("Control API shutdown complete");
    Ok(())
}
