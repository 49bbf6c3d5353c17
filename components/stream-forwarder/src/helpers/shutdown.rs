//! ======================================================================
//!                                 GOALS
//! ======================================================================
//!
//! 1. The follow loop is never killed mid-flush
//! 2. The in-flight batch is flushed or discarded deterministically
//! 3. The metrics server and signal listener stop with the loop
//!
//! ======================================================================
//!                             BUILDING BLOCKS
//! ======================================================================
//!
//! 1. A root `CancellationToken` owned by `Shutdown`, handed out to each
//! long-running task.
//!
//! 2. A signal listener task that waits for CTRL+C or SIGTERM and cancels
//! the root token.
//!
//! 3. Co-operative checks in each loop, the Batcher checks the token once per
//! iteration and races it against its idle sleep.

// External crates
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Process-wide shutdown coordinator.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Creates a new, untriggered shutdown coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Returns a token that is cancelled when shutdown is triggered.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Trigger shutdown, notifying every holder of a token.
    #[instrument(
        name = "forwarder_shutdown_trigger",
        target = "helpers::shutdown",
        level = "trace",
        skip_all
    )]
    pub fn trigger(&self) {
        tracing::trace!("Shutdown triggered, cancelling root token");
        self.token.cancel();
    }

    /// Whether shutdown has already been triggered.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn the OS signal listener. The task ends on the first signal or
    /// when shutdown is triggered by other means.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let shutdown = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.token.cancelled() => {}
                name = wait_for_signal() => {
                    tracing::info!(signal = name, "Signal received, shutting down forwarder");
                    shutdown.trigger();
                }
            }
        })
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal as unix_signal};

    let mut sigterm = match unix_signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install SIGTERM handler, only CTRL+C is handled");
            return ctrl_c().await;
        }
    };

    tokio::select! {
        name = ctrl_c() => name,
        _ = sigterm.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for CTRL+C signal");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_cancels_handed_out_tokens() {
        let shutdown = Shutdown::new();
        let token = shutdown.token();
        assert!(!token.is_cancelled());

        shutdown.trigger();

        assert!(token.is_cancelled());
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn signal_listener_exits_on_manual_trigger() {
        let shutdown = Shutdown::new();
        let listener = shutdown.listen_for_signals();

        shutdown.trigger();

        tokio::time::timeout(std::time::Duration::from_secs(1), listener)
            .await
            .unwrap()
            .unwrap();
    }
}
