use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::WaitError;

/// Suspends a caller until an external party supplies a value for a key,
/// the per-bridge timeout elapses, or the wait is cancelled.
///
/// At most one waiter exists per key: starting a new wait on an occupied key
/// fails the previous waiter with `Superseded` before the new one can
/// resolve. All map mutations happen under a single mutex; the lock is never
/// held across an await point.
#[derive(Clone)]
pub struct PendingBridge<T> {
    inner: Arc<BridgeInner<T>>,
}

struct BridgeInner<T> {
    waiters: Mutex<HashMap<String, Waiter<T>>>,
    timeout: Duration,
    epoch: AtomicU64,
}

struct Waiter<T> {
    tx: oneshot::Sender<Result<T, WaitError>>,
    epoch: u64,
}

impl<T: Send + 'static> PendingBridge<T> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                waiters: Mutex::new(HashMap::new()),
                timeout,
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Register a waiter for `key` and suspend until it resolves.
    ///
    /// `on_requested` runs exactly once, after the waiter is registered and
    /// before suspension, so the caller can announce that input is needed.
    pub async fn wait_for(
        &self,
        key: &str,
        on_requested: impl FnOnce(),
    ) -> Result<T, WaitError> {
        let (tx, rx) = oneshot::channel();
        let epoch = self.inner.epoch.fetch_add(1, Ordering::Relaxed);
        {
            let mut waiters = lock_waiters(&self.inner.waiters);
            if let Some(prev) = waiters.remove(key) {
                let _ = prev.tx.send(Err(WaitError::Superseded));
            }
            waiters.insert(key.to_string(), Waiter { tx, epoch });
        }

        on_requested();

        match tokio::time::timeout(self.inner.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without a verdict; treat as cancellation.
            Ok(Err(_)) => Err(WaitError::Cancelled),
            Err(_) => {
                let mut waiters = lock_waiters(&self.inner.waiters);
                // Only remove our own entry; a newer wait may have
                // superseded this one while the timer was running.
                if waiters.get(key).is_some_and(|w| w.epoch == epoch) {
                    waiters.remove(key);
                }
                Err(WaitError::Timeout)
            }
        }
    }

    /// Fulfill the pending wait for `key`, if one exists.
    ///
    /// Returns whether a live waiter was found. A second call for the same
    /// key returns false without side effects.
    pub fn supply(&self, key: &str, value: T) -> bool {
        let waiter = lock_waiters(&self.inner.waiters).remove(key);
        match waiter {
            Some(w) => w.tx.send(Ok(value)).is_ok(),
            None => false,
        }
    }

    /// Fail the pending wait for `key` with `Cancelled`; no-op if none.
    pub fn cancel(&self, key: &str) {
        if let Some(w) = lock_waiters(&self.inner.waiters).remove(key) {
            let _ = w.tx.send(Err(WaitError::Cancelled));
        }
    }

    pub fn has_waiter(&self, key: &str) -> bool {
        lock_waiters(&self.inner.waiters).contains_key(key)
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }
}

fn lock_waiters<T>(
    waiters: &Mutex<HashMap<String, Waiter<T>>>,
) -> std::sync::MutexGuard<'_, HashMap<String, Waiter<T>>> {
    match waiters.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge() -> PendingBridge<String> {
        PendingBridge::new(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn supply_resolves_waiter() {
        let b = bridge();
        let waiter = {
            let b = b.clone();
            tokio::spawn(async move { b.wait_for("acct-1", || {}).await })
        };

        // Let the waiter register before supplying.
        tokio::task::yield_now().await;
        while !b.has_waiter("acct-1") {
            tokio::task::yield_now().await;
        }

        assert!(b.supply("acct-1", "123456".into()));
        assert_eq!(waiter.await.unwrap(), Ok("123456".to_string()));
        assert!(!b.has_waiter("acct-1"));
    }

    #[tokio::test]
    async fn supply_without_waiter_is_a_no_op() {
        let b = bridge();
        assert!(!b.supply("acct-1", "000000".into()));
        assert!(!b.supply("acct-1", "000000".into()));
    }

    #[tokio::test]
    async fn second_wait_supersedes_first() {
        let b = bridge();
        let first = {
            let b = b.clone();
            tokio::spawn(async move { b.wait_for("acct-1", || {}).await })
        };
        tokio::task::yield_now().await;
        while !b.has_waiter("acct-1") {
            tokio::task::yield_now().await;
        }

        let second = {
            let b = b.clone();
            tokio::spawn(async move { b.wait_for("acct-1", || {}).await })
        };

        // The first waiter must fail before the second can resolve.
        assert_eq!(first.await.unwrap(), Err(WaitError::Superseded));

        assert!(b.supply("acct-1", "654321".into()));
        assert_eq!(second.await.unwrap(), Ok("654321".to_string()));
    }

    #[tokio::test]
    async fn cancel_fails_waiter() {
        let b = bridge();
        let waiter = {
            let b = b.clone();
            tokio::spawn(async move { b.wait_for("acct-1", || {}).await })
        };
        tokio::task::yield_now().await;
        while !b.has_waiter("acct-1") {
            tokio::task::yield_now().await;
        }

        b.cancel("acct-1");
        assert_eq!(waiter.await.unwrap(), Err(WaitError::Cancelled));
        // Cancelling again with no waiter present is fine.
        b.cancel("acct-1");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_removes_entry_exactly_once() {
        let b: PendingBridge<String> = PendingBridge::new(Duration::from_secs(5));
        let result = b.wait_for("acct-1", || {}).await;
        assert_eq!(result, Err(WaitError::Timeout));
        // The entry is gone, so a late supply finds nobody.
        assert!(!b.supply("acct-1", "late".into()));
    }

    #[tokio::test]
    async fn on_requested_runs_before_suspension() {
        let b = bridge();
        let notified = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = notified.clone();
        let b2 = b.clone();
        let waiter = tokio::spawn(async move {
            b2.wait_for("acct-1", || {
                flag.store(true, Ordering::SeqCst);
            })
            .await
        });

        while !b.has_waiter("acct-1") {
            tokio::task::yield_now().await;
        }
        assert!(notified.load(Ordering::SeqCst));
        b.supply("acct-1", "ok".into());
        waiter.await.unwrap().unwrap();
    }
}
