//! Lock client
//!
//! Implements acquisition and release of one lock key against a
//! [`LockStore`]:
//! - Claim an absent key with set-if-absent
//! - Wait while the current lease is valid, polling at a fixed interval
//! - Steal an expired lease by swapping in a new token, conditioned on the
//!   key still holding exactly the expired token that was read
//! - Release only the token this client wrote (compare-and-delete)
//!
//! Expiry is judged against the local wall clock. Clock skew between the
//! holder and a stealer shifts the effective takeover time by the skew.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cancel::{self, CancelHandle};
use crate::config::{
    DEFAULT_ACQUIRE_TIMEOUT_MS, DEFAULT_LEASE_MS, DEFAULT_POLL_INTERVAL_MS, LockConfig,
};
use crate::error::{LockError, Result};
use crate::metrics::{self as lock_metrics, ContentionTracker};
use crate::store::LockStore;
use crate::token::{LeaseToken, current_timestamp};

/// Outcome of [`LockClient::release`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The key held this client's token and was deleted
    Released,
    /// The key no longer held this client's token; nothing was deleted
    Lost,
    /// This client did not hold the lock; the store was not touched
    NotHeld,
}

impl ReleaseOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ReleaseOutcome::Released => "released",
            ReleaseOutcome::Lost => "lost",
            ReleaseOutcome::NotHeld => "not_held",
        }
    }
}

impl std::fmt::Display for ReleaseOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a single steal attempt ended
enum Steal {
    Won(LeaseToken),
    Lost,
}

/// Client for one lock key
///
/// Many clients, in one process or many, may contend for the same key. A
/// single client runs at most one acquisition at a time.
pub struct LockClient {
    store: Arc<dyn LockStore>,
    key: String,
    lease: Duration,
    acquire_timeout: Duration,
    poll_interval: Duration,
    poll_jitter: Duration,
    /// Token written by this client's last successful acquire
    held: Mutex<Option<LeaseToken>>,
    /// Single-flight gate for `acquire`
    acquiring: tokio::sync::Mutex<()>,
    cancel: CancelHandle,
    tracker: Option<Arc<ContentionTracker>>,
}

impl LockClient {
    /// Client with default acquire timeout 10000 msecs and lease of 60000 msecs
    pub fn new(store: Arc<dyn LockStore>, key: impl Into<String>) -> Self {
        Self::with_timeout_and_lease(
            store,
            key,
            Duration::from_millis(DEFAULT_ACQUIRE_TIMEOUT_MS),
            Duration::from_millis(DEFAULT_LEASE_MS),
        )
    }

    /// Client with default lease of 60000 msecs
    pub fn with_timeout(
        store: Arc<dyn LockStore>,
        key: impl Into<String>,
        acquire_timeout: Duration,
    ) -> Self {
        Self::with_timeout_and_lease(
            store,
            key,
            acquire_timeout,
            Duration::from_millis(DEFAULT_LEASE_MS),
        )
    }

    pub fn with_timeout_and_lease(
        store: Arc<dyn LockStore>,
        key: impl Into<String>,
        acquire_timeout: Duration,
        lease: Duration,
    ) -> Self {
        Self {
            store,
            key: key.into(),
            lease,
            acquire_timeout,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            poll_jitter: Duration::ZERO,
            held: Mutex::new(None),
            acquiring: tokio::sync::Mutex::new(()),
            cancel: CancelHandle::new(),
            tracker: None,
        }
    }

    /// Build a client from validated settings
    pub fn from_config(store: Arc<dyn LockStore>, config: &LockConfig) -> Result<Self> {
        config.validate()?;
        Ok(
            Self::with_timeout_and_lease(
                store,
                config.key.clone(),
                config.acquire_timeout(),
                config.lease(),
            )
            .with_poll_interval(config.poll_interval())
            .with_poll_jitter(config.poll_jitter()),
        )
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Add up to `poll_jitter` of random sleep to every poll
    pub fn with_poll_jitter(mut self, poll_jitter: Duration) -> Self {
        self.poll_jitter = poll_jitter;
        self
    }

    pub fn with_contention_tracker(mut self, tracker: Arc<ContentionTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    /// Whether this client believes it holds the lock
    ///
    /// Local bookkeeping only: the lease may already have expired and been
    /// stolen without this client noticing.
    pub fn is_held(&self) -> bool {
        self.held.lock().is_some()
    }

    /// The token this client wrote, while it believes it holds the lock
    pub fn held_token(&self) -> Option<LeaseToken> {
        self.held.lock().clone()
    }

    /// Handle that aborts an in-flight [`acquire`](Self::acquire)
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Read the lease currently stored under the key
    pub async fn current_lease(&self) -> Result<Option<LeaseToken>> {
        match self.store.get(&self.key).await? {
            Some(value) => Ok(Some(self.parse_token(value)?)),
            None => Ok(None),
        }
    }

    /// Acquire the lock
    ///
    /// Returns `Ok(true)` once acquired and `Ok(false)` if the acquire timeout
    /// passed first. Store failures are returned immediately, cancellation
    /// returns [`LockError::Aborted`].
    pub async fn acquire(&self) -> Result<bool> {
        let _gate = self
            .acquiring
            .try_lock()
            .map_err(|_| LockError::AcquireInProgress(self.key.clone()))?;
        if self.is_held() {
            return Err(LockError::AlreadyHeld(self.key.clone()));
        }

        let started = Instant::now();
        let result = self.acquire_loop(started + self.acquire_timeout).await;
        // A pending cancel belongs to this acquisition, whatever its outcome
        self.cancel.reset();
        let outcome = match &result {
            Ok(Some(_)) => "acquired",
            Ok(None) => "timeout",
            Err(LockError::Aborted) => "aborted",
            Err(_) => "error",
        };
        lock_metrics::record_acquire(outcome, started.elapsed());

        match result {
            Ok(Some(token)) => {
                info!(
                    key = %self.key,
                    expires_at = token.expires_at(),
                    waited_ms = started.elapsed().as_millis() as u64,
                    "Lock acquired"
                );
                *self.held.lock() = Some(token);
                Ok(true)
            }
            Ok(None) => {
                debug!(key = %self.key, "Lock acquisition timed out");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn acquire_loop(&self, deadline: Instant) -> Result<Option<LeaseToken>> {
        let mut cancelled = self.cancel.subscribe();

        loop {
            // Claim an unheld key
            let token = LeaseToken::issue_for_lease(current_timestamp(), self.lease);
            let encoded = token.encode();
            if self.store.set_if_absent(&self.key, &encoded).await? {
                debug!(key = %self.key, "Claimed free lock key");
                return Ok(Some(token));
            }

            // Contend for a held key
            let Some(current) = self.store.get(&self.key).await? else {
                // Released between the claim and the read
                if Instant::now() > deadline {
                    break;
                }
                continue;
            };
            let current_token = self.parse_token(current.clone())?;

            if current_token.is_expired_at(current_timestamp()) {
                match self.steal(&current).await? {
                    Steal::Won(token) => return Ok(Some(token)),
                    Steal::Lost => {}
                }
            }

            if Instant::now() > deadline {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.next_poll_delay()) => {}
                _ = cancel::cancelled(&mut cancelled) => {
                    debug!(key = %self.key, "Lock acquisition aborted");
                    return Err(LockError::Aborted);
                }
            }
        }

        Ok(None)
    }

    /// Replace the expired token `observed` with a fresh one
    ///
    /// The store swaps only while the key still holds exactly `observed`, so
    /// of all contenders that read the same expired token one replaces it and
    /// the rest write nothing.
    async fn steal(&self, observed: &str) -> Result<Steal> {
        let token = LeaseToken::issue_for_lease(current_timestamp(), self.lease);
        let swapped = self
            .store
            .compare_and_swap(&self.key, observed, &token.encode())
            .await?;

        if !swapped {
            lock_metrics::record_steal("lost");
            debug!(key = %self.key, "Lost steal race");
            return Ok(Steal::Lost);
        }

        lock_metrics::record_steal("won");
        if let Some(tracker) = &self.tracker {
            tracker.record_steal(&self.key, observed);
        }
        info!(key = %self.key, stolen = %observed, "Stole expired lock");
        Ok(Steal::Won(token))
    }

    /// Release the lock if this client holds it
    ///
    /// Deletes the key only while it still holds the token this client wrote.
    /// If the lease was stolen meanwhile the new holder's token is left alone
    /// and [`ReleaseOutcome::Lost`] is returned. On a store error the client
    /// keeps its held state so the release can be retried.
    pub async fn release(&self) -> Result<ReleaseOutcome> {
        let Some(token) = self.held_token() else {
            lock_metrics::record_release(ReleaseOutcome::NotHeld.as_str());
            return Ok(ReleaseOutcome::NotHeld);
        };

        let removed = self
            .store
            .compare_and_delete(&self.key, &token.encode())
            .await?;

        {
            let mut held = self.held.lock();
            if held.as_ref() == Some(&token) {
                *held = None;
            }
        }

        let outcome = if removed {
            info!(key = %self.key, "Lock released");
            ReleaseOutcome::Released
        } else {
            warn!(
                key = %self.key,
                expires_at = token.expires_at(),
                "Lock lease was lost before release"
            );
            ReleaseOutcome::Lost
        };
        lock_metrics::record_release(outcome.as_str());
        Ok(outcome)
    }

    /// Run `f` while holding the lock
    ///
    /// Returns `Ok(None)` when the lock could not be acquired in time. The lock
    /// is released after `f` completes; a lost lease is logged by `release`.
    pub async fn with_lock<F, Fut, T>(&self, f: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.acquire().await? {
            return Ok(None);
        }
        let output = f().await;
        self.release().await?;
        Ok(Some(output))
    }

    fn parse_token(&self, value: String) -> Result<LeaseToken> {
        LeaseToken::parse(&value).ok_or_else(|| LockError::MalformedToken {
            key: self.key.clone(),
            value,
        })
    }

    fn next_poll_delay(&self) -> Duration {
        if self.poll_jitter.is_zero() {
            return self.poll_interval;
        }
        let jitter_ms = rand::rng().random_range(0..=self.poll_jitter.as_millis() as u64);
        self.poll_interval + Duration::from_millis(jitter_ms)
    }
}

impl std::fmt::Debug for LockClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockClient")
            .field("key", &self.key)
            .field("lease", &self.lease)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("held", &self.is_held())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::error::StoreError;
    use crate::store::MemoryStore;

    fn client(store: &MemoryStore, timeout_ms: u64, lease_ms: u64) -> LockClient {
        LockClient::with_timeout_and_lease(
            Arc::new(store.clone()),
            "test-lock",
            Duration::from_millis(timeout_ms),
            Duration::from_millis(lease_ms),
        )
        .with_poll_interval(Duration::from_millis(20))
    }

    #[test]
    fn test_default_settings() {
        let client = LockClient::new(Arc::new(MemoryStore::new()), "account:1");
        assert_eq!(client.key(), "account:1");
        assert_eq!(client.acquire_timeout(), Duration::from_secs(10));
        assert_eq!(client.lease(), Duration::from_secs(60));
        assert!(!client.is_held());

        let client = LockClient::with_timeout(
            Arc::new(MemoryStore::new()),
            "account:1",
            Duration::from_millis(250),
        );
        assert_eq!(client.acquire_timeout(), Duration::from_millis(250));
        assert_eq!(client.lease(), Duration::from_secs(60));
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let err = LockClient::from_config(Arc::new(MemoryStore::new()), &LockConfig::new(""))
            .unwrap_err();
        assert!(matches!(err, LockError::Config(_)));
    }

    #[tokio::test]
    async fn test_claim_writes_token() {
        let store = MemoryStore::new();
        let lock = client(&store, 100, 60_000);

        assert!(lock.acquire().await.unwrap());
        assert!(lock.is_held());

        let stored = store.get("test-lock").await.unwrap().unwrap();
        let held = lock.held_token().unwrap();
        assert_eq!(stored, held.encode());
        assert!(held.expires_at() > current_timestamp() + 59_000);
    }

    #[tokio::test]
    async fn test_acquire_twice_is_not_reentrant() {
        let store = MemoryStore::new();
        let lock = client(&store, 100, 60_000);

        assert!(lock.acquire().await.unwrap());
        assert!(matches!(
            lock.acquire().await,
            Err(LockError::AlreadyHeld(_))
        ));
    }

    #[tokio::test]
    async fn test_release_lifecycle() {
        let store = MemoryStore::new();
        let lock = client(&store, 100, 60_000);

        assert_eq!(lock.release().await.unwrap(), ReleaseOutcome::NotHeld);
        assert!(lock.acquire().await.unwrap());
        assert_eq!(lock.release().await.unwrap(), ReleaseOutcome::Released);
        assert!(!lock.is_held());
        assert!(store.is_empty());
        assert_eq!(lock.release().await.unwrap(), ReleaseOutcome::NotHeld);

        // Idle again, so the lock can be taken anew
        assert!(lock.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn test_steal_legacy_token() {
        let store = MemoryStore::new();
        store.swap("test-lock", "1000").await.unwrap();

        let lock = client(&store, 200, 60_000);
        assert!(lock.acquire().await.unwrap());
        assert_eq!(
            store.get("test-lock").await.unwrap(),
            lock.held_token().map(|t| t.encode())
        );
    }

    #[tokio::test]
    async fn test_losing_stealer_leaves_winner_token() {
        let store = MemoryStore::new();
        let expired = LeaseToken::issue(1_000).encode();
        store.swap("test-lock", &expired).await.unwrap();

        let winner = client(&store, 200, 60_000);
        assert!(winner.acquire().await.unwrap());
        let winner_token = winner.held_token().unwrap().encode();

        // A contender that read the same expired token steals after the winner
        let loser = client(&store, 200, 60_000);
        assert!(matches!(loser.steal(&expired).await.unwrap(), Steal::Lost));
        assert!(!loser.is_held());

        assert_eq!(
            store.get("test-lock").await.unwrap().as_deref(),
            Some(winner_token.as_str())
        );
        assert_eq!(winner.release().await.unwrap(), ReleaseOutcome::Released);
    }

    #[tokio::test]
    async fn test_steal_of_vanished_key_writes_nothing() {
        let store = MemoryStore::new();
        let loser = client(&store, 200, 60_000);

        // The key vanished between the read and the steal
        assert!(matches!(
            loser.steal("1000_gone").await.unwrap(),
            Steal::Lost
        ));
        assert!(store.is_empty());
    }

    /// Memory store that parks the first `compare_and_swap` until resumed
    struct GatedStore {
        inner: MemoryStore,
        gated: AtomicBool,
        parked: Notify,
        resume: Notify,
    }

    impl GatedStore {
        fn new(inner: MemoryStore) -> Self {
            Self {
                inner,
                gated: AtomicBool::new(true),
                parked: Notify::new(),
                resume: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl LockStore for GatedStore {
        async fn set_if_absent(
            &self,
            key: &str,
            value: &str,
        ) -> std::result::Result<bool, StoreError> {
            self.inner.set_if_absent(key, value).await
        }

        async fn get(&self, key: &str) -> std::result::Result<Option<String>, StoreError> {
            self.inner.get(key).await
        }

        async fn swap(
            &self,
            key: &str,
            value: &str,
        ) -> std::result::Result<Option<String>, StoreError> {
            self.inner.swap(key, value).await
        }

        async fn delete(&self, key: &str) -> std::result::Result<(), StoreError> {
            self.inner.delete(key).await
        }

        async fn compare_and_delete(
            &self,
            key: &str,
            expected: &str,
        ) -> std::result::Result<bool, StoreError> {
            self.inner.compare_and_delete(key, expected).await
        }

        async fn compare_and_swap(
            &self,
            key: &str,
            expected: &str,
            value: &str,
        ) -> std::result::Result<bool, StoreError> {
            if self.gated.swap(false, Ordering::SeqCst) {
                self.parked.notify_one();
                self.resume.notified().await;
            }
            self.inner.compare_and_swap(key, expected, value).await
        }
    }

    #[tokio::test]
    async fn test_winner_release_while_loser_is_mid_steal() {
        let store = MemoryStore::new();
        let expired = LeaseToken::issue(1_000).encode();
        store.swap("test-lock", &expired).await.unwrap();

        let gated = Arc::new(GatedStore::new(store.clone()));
        let loser = Arc::new(LockClient::with_timeout_and_lease(
            gated.clone(),
            "test-lock",
            Duration::from_millis(200),
            Duration::from_millis(60_000),
        ));
        let stealing = {
            let loser = loser.clone();
            let expired = expired.clone();
            tokio::spawn(async move { matches!(loser.steal(&expired).await, Ok(Steal::Lost)) })
        };
        gated.parked.notified().await;

        // The winner takes the expired lease and lets it go while the loser is parked
        let winner = client(&store, 200, 60_000);
        assert!(winner.acquire().await.unwrap());
        assert_eq!(winner.release().await.unwrap(), ReleaseOutcome::Released);
        assert!(!winner.is_held());

        gated.resume.notify_one();
        assert!(stealing.await.unwrap());
        assert!(!loser.is_held());

        // Nothing is left behind that would block the next caller
        assert!(store.is_empty());
        let next = client(&store, 0, 60_000);
        assert!(next.acquire().await.unwrap());
    }

    #[tokio::test]
    async fn test_malformed_value_is_reported() {
        let store = MemoryStore::new();
        store.swap("test-lock", "locked-by-someone").await.unwrap();

        let lock = client(&store, 200, 60_000);
        let err = lock.acquire().await.unwrap_err();
        assert!(matches!(err, LockError::MalformedToken { .. }));
        assert!(!lock.is_held());
        // The foreign value is left untouched
        assert_eq!(
            store.get("test-lock").await.unwrap().as_deref(),
            Some("locked-by-someone")
        );
    }

    #[tokio::test]
    async fn test_current_lease() {
        let store = MemoryStore::new();
        let lock = client(&store, 100, 60_000);

        assert!(lock.current_lease().await.unwrap().is_none());
        lock.acquire().await.unwrap();
        assert_eq!(lock.current_lease().await.unwrap(), lock.held_token());
    }

    #[tokio::test]
    async fn test_with_lock_runs_and_releases() {
        let store = MemoryStore::new();
        let lock = client(&store, 100, 60_000);

        let output = lock.with_lock(|| async { 42 }).await.unwrap();
        assert_eq!(output, Some(42));
        assert!(!lock.is_held());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_with_lock_times_out() {
        let store = MemoryStore::new();
        let holder = client(&store, 100, 60_000);
        assert!(holder.acquire().await.unwrap());

        let waiter = client(&store, 60, 60_000);
        let output = waiter.with_lock(|| async { 42 }).await.unwrap();
        assert_eq!(output, None);
    }

    #[tokio::test]
    async fn test_poll_delay_with_jitter_is_bounded() {
        let lock = client(&MemoryStore::new(), 100, 60_000)
            .with_poll_jitter(Duration::from_millis(30));
        for _ in 0..50 {
            let delay = lock.next_poll_delay();
            assert!(delay >= Duration::from_millis(20));
            assert!(delay <= Duration::from_millis(50));
        }
    }
}
