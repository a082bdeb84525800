//! Shutdown coordination.

use tokio_util::sync::CancellationToken;

/// Coordinator for graceful shutdown.
///
/// Long-running tasks take a child token; triggering the coordinator cancels
/// all of them, while a child cancelling itself leaves the others running.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token cancelled when shutdown is triggered.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once shutdown has been triggered.
    pub async fn triggered(&self) {
        self.token.cancelled().await
    }
}
