use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use eyre::{Result, WrapErr};
use tokio::{signal, sync::broadcast};

/// Represents different shutdown reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Requested programmatically, e.g. by an embedding application or a test
    Requested,
}

/// Broadcasts a single shutdown event to every interested task.
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    /// Flag indicating if shutdown has been initiated
    shutdown_initiated: Arc<AtomicBool>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    /// Trigger shutdown without an OS signal. Only the first call has an effect.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        self.initiate_shutdown(reason);
    }

    /// Wait for SIGINT or SIGTERM and broadcast the shutdown.
    pub async fn run_signal_handler(&self) -> Result<()> {
        tracing::info!("Signal handler started. Listening for SIGTERM and SIGINT");

        let reason = tokio::select! {
            res = signal::ctrl_c() => {
                res.wrap_err("Failed to listen for SIGINT")?;
                ShutdownReason::Interrupt
            }
            res = wait_for_sigterm() => {
                res?;
                ShutdownReason::Terminate
            }
        };

        tracing::info!(?reason, "Received shutdown signal, initiating graceful shutdown");
        self.initiate_shutdown(reason);
        Ok(())
    }

    fn initiate_shutdown(&self, reason: ShutdownReason) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            tracing::info!("Processing shutdown: {:?}", reason);
            // No receivers simply means nobody is waiting yet; the flag covers them
            let _ = self.shutdown_tx.send(reason);
        } else {
            tracing::warn!("Shutdown already initiated, ignoring {:?}", reason);
        }
    }

    /// Create a token that resolves once shutdown has been initiated.
    pub fn shutdown_token(&self) -> ShutdownToken {
        ShutdownToken {
            receiver: self.shutdown_tx.subscribe(),
            shutdown_initiated: self.shutdown_initiated.clone(),
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm =
        signal(SignalKind::terminate()).wrap_err("Failed to register SIGTERM handler")?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    // On non-Unix systems, we only have Ctrl+C
    std::future::pending::<()>().await;
    Ok(())
}

/// A token that can be used to check for shutdown signals
pub struct ShutdownToken {
    receiver: broadcast::Receiver<ShutdownReason>,
    shutdown_initiated: Arc<AtomicBool>,
}

impl Clone for ShutdownToken {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.resubscribe(),
            shutdown_initiated: self.shutdown_initiated.clone(),
        }
    }
}

impl ShutdownToken {
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been initiated, including when that
    /// happened before this call or before the token was created.
    pub async fn wait_for_shutdown(&mut self) {
        if self.is_shutdown_initiated() {
            return;
        }
        // Sender dropped or lagged both mean there is nothing left to wait for
        let _ = self.receiver.recv().await;
    }
}
