//! Redis lock store
//!
//! Maps the lock primitives onto single Redis commands:
//!
//! | Primitive            | Redis                     |
//! |----------------------|---------------------------|
//! | `set_if_absent`      | `SET key value NX`        |
//! | `get`                | `GET key`                 |
//! | `swap`               | `GETSET key value`        |
//! | `delete`             | `DEL key`                 |
//! | `compare_and_delete` | Lua script (GET + DEL)    |
//! | `compare_and_swap`   | Lua script (GET + SET)    |
//!
//! Scripts run atomically on the server, so the conditional primitives keep
//! the same per-key atomicity as the plain commands.
//!
//! ```ignore
//! use keylock::store::RedisStore;
//!
//! let store = RedisStore::connect("redis://127.0.0.1:6379").await?;
//! ```

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};

use super::LockStore;
use crate::error::StoreError;

const COMPARE_AND_DELETE: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

const COMPARE_AND_SWAP: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2])
    return 1
end
return 0
"#;

/// [`LockStore`] backed by a single Redis server
///
/// Uses one multiplexed connection, cloned per call.
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
    compare_and_delete: Script,
    compare_and_swap: Script,
}

impl RedisStore {
    /// Connect to the server at `url` (e.g. "redis://localhost:6379")
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|e| StoreError::Unavailable(format!(
            "failed to create Redis client: {}",
            e
        )))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::Unavailable(format!("failed to connect to Redis: {}", e)))?;

        Ok(Self {
            connection,
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
            compare_and_swap: Script::new(COMPARE_AND_SWAP),
        })
    }
}

#[async_trait]
impl LockStore for RedisStore {
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let written: bool = conn.set_nx(key, value).await?;
        Ok(written)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn swap(&self, key: &str, value: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        let previous: Option<String> = conn.getset(key, value).await?;
        Ok(previous)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let removed: i64 = self
            .compare_and_delete
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let swapped: i64 = self
            .compare_and_swap
            .key(key)
            .arg(expected)
            .arg(value)
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped == 1)
    }
}
