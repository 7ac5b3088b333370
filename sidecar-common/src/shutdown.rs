//! Process-wide cooperative shutdown signal.

use std::sync::{Arc, OnceLock};

use tokio::signal::unix::SignalKind;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::info;

const DEFAULT_REASON: &str = "shutdown requested";

/// A cloneable cancellation signal that remembers why it was triggered.
///
/// Every blocking wait in the sidecar races against [`Shutdown::triggered`], so a single
/// call to [`Shutdown::trigger`] stops the lifecycle and the file API alike.
#[derive(Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger the shutdown. Only the first reason is kept.
    pub fn trigger(&self, reason: impl Into<String>) {
        drop(self.reason.set(reason.into()));
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Future that resolves once shutdown has been triggered. Use in `tokio::select!`.
    pub fn triggered(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn reason(&self) -> String {
        self.reason
            .get()
            .cloned()
            .unwrap_or_else(|| DEFAULT_REASON.to_owned())
    }

    /// Owned token, for APIs that need a `'static` shutdown future.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

/// Trigger `shutdown` when the process receives SIGINT or SIGTERM.
pub async fn trigger_on_signal(shutdown: Shutdown) -> std::io::Result<()> {
    let mut term = tokio::signal::unix::signal(SignalKind::terminate())?;
    let mut interrupt = tokio::signal::unix::signal(SignalKind::interrupt())?;

    let reason = tokio::select! {
        _ = term.recv() => "received SIGTERM",
        _ = interrupt.recv() => "received SIGINT",
        _ = shutdown.triggered() => return Ok(()),
    };

    info!(reason, "shutting down gracefully");
    shutdown.trigger(reason);
    Ok(())
}
