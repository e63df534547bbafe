// Cancellation signal for in-flight acquisitions

use tokio::sync::watch;

/// Aborts the acquisition loop of the client it was taken from
///
/// Cancelling interrupts the poll sleep; the pending `acquire` returns
/// [`LockError::Aborted`](crate::LockError::Aborted). A cancel issued while
/// no acquisition is running aborts the next one if it has to wait. Every
/// acquisition clears the signal when it returns, so a cancel never outlives
/// the acquisition that observed it.
#[derive(Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub(crate) fn reset(&self) {
        self.tx.send_replace(false);
    }
}

/// Resolves once the paired handle signals cancellation
pub(crate) async fn cancelled(rx: &mut watch::Receiver<bool>) {
    // A closed channel means no handle can cancel any more
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_cancel_wakes_waiter() {
        let handle = CancelHandle::new();
        let mut rx = handle.subscribe();
        let remote = handle.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            remote.cancel();
        });

        tokio::time::timeout(Duration::from_secs(1), cancelled(&mut rx))
            .await
            .expect("cancel should wake the waiter");
        assert!(handle.is_cancelled());

        handle.reset();
        assert!(!handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_not_cancelled_stays_pending() {
        let handle = CancelHandle::new();
        let mut rx = handle.subscribe();
        let result = tokio::time::timeout(Duration::from_millis(30), cancelled(&mut rx)).await;
        assert!(result.is_err());
        assert!(!handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_before_wait_is_observed() {
        let handle = CancelHandle::new();
        handle.cancel();

        let mut rx = handle.subscribe();
        tokio::time::timeout(Duration::from_millis(100), cancelled(&mut rx))
            .await
            .expect("pending cancel should be observed immediately");
    }
}
