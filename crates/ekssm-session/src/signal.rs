//! OS signal to cancellation bridge
//!
//! The listener only cancels the token; the flows observing it run their own
//! cleanup and return. Once installed, tokio keeps the handlers for the life
//! of the process, so a second Ctrl+C during cleanup does not kill it.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cancel `cancel` on SIGINT or SIGTERM.
///
/// The task exits without cancelling if the token is cancelled elsewhere first.
pub fn spawn_signal_listener(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt() => {
                tracing::info!("Received Ctrl+C, shutting down...");
            }
            _ = terminate() => {
                tracing::info!("Received SIGTERM, shutting down...");
            }
            _ = cancel.cancelled() => return,
        }
        cancel.cancel();
    })
}

async fn interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            tracing::warn!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_listener_exits_when_cancelled_elsewhere() {
        let cancel = CancellationToken::new();
        let handle = spawn_signal_listener(cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
