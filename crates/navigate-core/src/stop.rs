//! Cooperative cancellation for acquisition runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Shared stop flag.
///
/// Clones observe the same flag. The executor polls [`is_requested`] at safe
/// points; long waits select on [`cancelled`].
///
/// [`is_requested`]: StopHandle::is_requested
/// [`cancelled`]: StopHandle::cancelled
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag before a new run.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    /// Resolves once a stop has been requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_requested() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancelled_resolves_after_request() {
        let stop = StopHandle::new();
        let waiter = {
            let stop = stop.clone();
            tokio::spawn(async move { stop.cancelled().await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        stop.request();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(stop.is_requested());
        stop.reset();
        assert!(!stop.is_requested());
    }

    #[tokio::test]
    async fn cancelled_returns_immediately_when_already_requested() {
        let stop = StopHandle::new();
        stop.request();
        tokio::time::timeout(Duration::from_millis(50), stop.cancelled())
            .await
            .unwrap();
    }
}
