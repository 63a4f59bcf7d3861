//! Shutdown coordination for the server.

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Coordinator for graceful shutdown.
///
/// Pairs a broadcast-once token, which every long-running task watches, with
/// the task group those tasks run in. Triggering fires the token once;
/// [`wait`](Self::wait) resolves when every tracked task has exited.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared shutdown signal.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Task group that [`wait`](Self::wait) drains.
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Trigger the shutdown signal. Later calls are no-ops.
    pub fn trigger(&self) {
        self.token.cancel();
        self.tracker.close();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until the signal has fired and every tracked task has exited.
    pub async fn wait(&self) {
        self.token.cancelled().await;
        self.tracker.wait().await;
    }

    /// Number of tracked tasks still running.
    pub fn task_count(&self) -> usize {
        self.tracker.len()
    }
}
