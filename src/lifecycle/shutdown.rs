//! Signal handling for graceful shutdown

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing::debug;

/// Handles shutdown requests: SIGTERM, SIGINT, or an explicit trigger
pub struct ShutdownSignal {
    requested: Arc<Notify>,
}

/// Cloneable handle that requests shutdown from elsewhere (e.g. IPC)
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    requested: Arc<Notify>,
}

impl ShutdownTrigger {
    /// Request shutdown. Remembered even if nobody is waiting yet.
    pub fn fire(&self) {
        self.requested.notify_one();
    }
}

impl ShutdownSignal {
    /// Create a new shutdown signal handler
    pub fn new() -> Self {
        Self {
            requested: Arc::new(Notify::new()),
        }
    }

    /// Handle for requesting shutdown without a signal
    pub fn trigger(&self) -> ShutdownTrigger {
        ShutdownTrigger {
            requested: Arc::clone(&self.requested),
        }
    }

    /// Wait for a shutdown signal or trigger
    pub async fn wait(&self) -> std::io::Result<()> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                debug!("received SIGTERM");
            }
            _ = sigint.recv() => {
                debug!("received SIGINT");
            }
            _ = self.requested.notified() => {
                debug!("shutdown requested");
            }
        }

        Ok(())
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
