//! Level-triggered wake-up signal.
//!
//! A [`Signal`] stays set until explicitly reset, so a waiter that arrives
//! after `set()` returns immediately instead of missing the wake-up. Waiting
//! is cancelled by dropping the future.

use tokio::sync::watch;

pub(crate) struct Signal {
    state: watch::Sender<bool>,
}

impl Signal {
    pub(crate) fn new(initial: bool) -> Self {
        let (state, _) = watch::channel(initial);
        Self { state }
    }

    /// Set the signal, releasing every current and future waiter.
    pub(crate) fn set(&self) {
        self.state.send_replace(true);
    }

    /// Clear the signal so that subsequent waits block.
    pub(crate) fn reset(&self) {
        self.state.send_replace(false);
    }

    pub(crate) fn is_set(&self) -> bool {
        *self.state.borrow()
    }

    /// Wait until the signal is set.
    pub(crate) async fn wait(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|set| *set).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_when_already_set() {
        let signal = Signal::new(true);
        tokio::time::timeout(Duration::from_millis(100), signal.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_blocks_until_set() {
        let signal = Arc::new(Signal::new(false));

        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.wait().await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        signal.set();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_reset_blocks_again() {
        let signal = Signal::new(false);
        signal.set();
        signal.set();
        assert!(signal.is_set());

        signal.reset();
        assert!(!signal.is_set());

        let result = tokio::time::timeout(Duration::from_millis(20), signal.wait()).await;
        assert!(result.is_err());
    }
}
