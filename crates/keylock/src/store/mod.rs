//! Key-value store abstraction used by the lock protocol
//!
//! Every primitive must be atomic and linearizable for a single key. The
//! protocol never composes two calls into a read-modify-write where
//! atomicity matters; it relies on these primitives alone.

use async_trait::async_trait;

use crate::error::StoreError;

mod memory;
#[cfg(feature = "redis")]
mod redis;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;

/// Atomic single-key operations the lock client relies on
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Store `value` only if `key` has no value. Returns whether it was written.
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    /// Current value of `key`
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Unconditionally store `value`, returning the value it replaced
    async fn swap(&self, key: &str, value: &str) -> Result<Option<String>, StoreError>;

    /// Remove `key` unconditionally
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Remove `key` only if its value equals `expected`. Returns whether it was removed.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Replace the value of `key` with `value` only if it currently equals `expected`
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<bool, StoreError>;
}
