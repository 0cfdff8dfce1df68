//! Coalescing re-publish trigger.

use std::sync::Arc;

use tokio::sync::Notify;

/// Wakes the advertisement loop.
///
/// At most one wake-up is buffered; any number of `notify` calls made
/// while the loop is busy collapse into a single extra cycle.
#[derive(Debug, Clone, Default)]
pub struct Trigger {
    inner: Arc<Notify>,
}

impl Trigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.inner.notify_one();
    }

    pub async fn notified(&self) {
        self.inner.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn repeated_notifies_collapse() {
        let trigger = Trigger::new();
        trigger.notify();
        trigger.notify();
        trigger.notify();

        trigger.notified().await;
        let second = tokio::time::timeout(Duration::from_millis(20), trigger.notified()).await;
        assert!(second.is_err(), "only one wake-up should be buffered");
    }

    #[tokio::test]
    async fn clones_share_the_signal() {
        let trigger = Trigger::new();
        trigger.clone().notify();
        tokio::time::timeout(Duration::from_secs(1), trigger.notified())
            .await
            .unwrap();
    }
}
