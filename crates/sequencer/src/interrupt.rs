use std::{sync::Arc, time::Duration};

use tokio::sync::watch;

/// A resettable cancellation flag shared between a task and whoever controls it.
///
/// Requesting the interrupt wakes every pending [`InterruptToken::sleep`] and
/// [`InterruptToken::requested`] immediately. The flag stays set until [`InterruptToken::reset`]
/// is called.
#[derive(Clone, Debug)]
pub struct InterruptToken {
    flag: Arc<watch::Sender<bool>>,
}

impl InterruptToken {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self { flag: Arc::new(flag) }
    }

    pub fn request(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_requested(&self) -> bool {
        *self.flag.borrow()
    }

    pub fn reset(&self) {
        self.flag.send_replace(false);
    }

    /// Completes once the interrupt is requested.
    pub async fn requested(&self) {
        let mut receiver = self.flag.subscribe();
        // The sender lives as long as `self`, so waiting cannot fail.
        let _ = receiver.wait_for(|requested| *requested).await;
    }

    /// Sleeps for `duration` unless interrupted first.
    ///
    /// Returns `true` if the full duration elapsed and `false` if the interrupt was requested
    /// before or during the sleep.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_requested() {
            return false;
        }

        tokio::select! {
            () = tokio::time::sleep(duration) => !self.is_requested(),
            () = self.requested() => false,
        }
    }
}

impl Default for InterruptToken {
    fn default() -> Self {
        Self::new()
    }
}
