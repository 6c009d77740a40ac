//! Graceful shutdown handling for sharedfsd.
//!
//! The plugin socket and the maintenance loop both stop when the daemon
//! receives SIGTERM or SIGINT. Keep-alive records are left on disk on
//! purpose: discovery re-attaches the same volumes on the next start.

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Create a shutdown signal receiver.
///
/// Returns a broadcast receiver that fires when SIGTERM or SIGINT arrives,
/// or an error if the signal handler cannot be installed.
pub fn shutdown_signal() -> anyhow::Result<broadcast::Receiver<()>> {
    let (tx, rx) = broadcast::channel(1);

    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                // Keep running on the SIGTERM path alone.
                error!("failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await
            }
        };

        #[cfg(unix)]
        let terminate = async {
            terminate.recv().await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C)");
            }
            _ = terminate => {
                info!("Received SIGTERM");
            }
        }

        let _ = tx.send(());
    });

    Ok(rx)
}
