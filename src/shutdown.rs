//! Cooperative shutdown signal.
//!
//! A process-wide flag that is set at most once and never cleared. Every
//! intentional suspension point (the inter-order delay, the recorder tick,
//! the observation feed) goes through [`ShutdownSignal::sleep`] or selects on
//! [`ShutdownSignal::cancelled`], so a set signal is observed within one tick.
//!
//! Cancellation is cooperative: hook code that neither checks the signal nor
//! sleeps through it delays shutdown until it returns.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Result of an interruptible sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slept {
    /// The full duration elapsed.
    Completed,
    /// The signal fired before the duration elapsed.
    Interrupted,
}

/// Cloneable handle to a cancellation token.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    /// Create a fresh, unset signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal. Idempotent.
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("Shutdown requested");
        }
        self.token.cancel();
    }

    /// Whether the signal has been set.
    pub fn is_set(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal is set.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Sleep for `duration` unless the signal fires first.
    pub async fn sleep(&self, duration: Duration) -> Slept {
        if self.is_set() {
            return Slept::Interrupted;
        }
        tokio::select! {
            _ = self.token.cancelled() => Slept::Interrupted,
            _ = tokio::time::sleep(duration) => Slept::Completed,
        }
    }
}
