use std::sync::Arc;

use tokio::sync::watch;

/// Cooperative cancellation of a batch.
///
/// Clones share the same signal. Once cancelled, a batch dispatches no new
/// targets; probes already in flight run to completion.
#[derive(Debug, Clone)]
pub struct Cancellation {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellation {
    /// Create a signal that is not yet cancelled
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Whether [`Cancellation::cancel`] was called on any clone
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolve once cancelled
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}
