//! Graceful Shutdown Handling
//!
//! Waits for SIGTERM / SIGINT, stops the listener and gives in-flight
//! connections a bounded time to finish.

use std::time::{Duration, Instant};

use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::connection::ConnectionManager;
use crate::Result;

/// Turns OS signals into a shutdown broadcast and drains connections.
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// `shutdown_tx` is the channel the listener and its connections watch,
    /// normally `ConnectionManager::shutdown_sender`.
    pub fn new(shutdown_tx: broadcast::Sender<()>, timeout: Duration) -> Self {
        Self {
            shutdown_tx,
            timeout,
        }
    }

    pub fn for_manager(manager: &ConnectionManager, timeout: Duration) -> Self {
        Self::new(manager.shutdown_sender(), timeout)
    }

    /// Broadcast the shutdown signal without waiting for an OS signal.
    pub fn trigger(&self) {
        if self.shutdown_tx.send(()).is_err() {
            debug!("Shutdown triggered with no subscribers");
        }
    }

    /// Block until SIGTERM, SIGINT or Ctrl+C, then broadcast shutdown.
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
                _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        self.trigger();
        Ok(())
    }

    /// Stop the manager and wait for its connections to drain.
    ///
    /// Returns the number of connections still open when the timeout expired.
    pub async fn shutdown_connection_manager(&self, manager: &ConnectionManager) -> usize {
        manager.initiate_shutdown();
        let start = Instant::now();

        let mut remaining = manager.get_active_connections();
        info!(
            "Waiting for {} active connections to close (timeout: {:?})",
            remaining, self.timeout
        );

        while remaining > 0 && start.elapsed() < self.timeout {
            tokio::time::sleep(Duration::from_millis(50)).await;
            remaining = manager.get_active_connections();
        }

        if remaining == 0 {
            info!("All connections closed in {:?}", start.elapsed());
        } else {
            warn!(
                "Shutdown timeout reached after {:?} with {} connections still active",
                start.elapsed(),
                remaining
            );
        }
        remaining
    }
}
