//! Error types for lock clients and store backends

/// Failure reported by a [`LockStore`](crate::store::LockStore) backend
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store {op} failed: {message}")]
    Backend { op: &'static str, message: String },

    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Error type for lock operations
///
/// Timeouts are not errors: `acquire` reports them as `Ok(false)`.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("lock acquisition aborted")]
    Aborted,

    #[error("acquisition already in progress for key '{0}'")]
    AcquireInProgress(String),

    #[error("lock '{0}' is already held by this client")]
    AlreadyHeld(String),

    #[error("key '{key}' holds a value that is not a lease token: {value:?}")]
    MalformedToken { key: String, value: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for LockError {
    fn from(value: config::ConfigError) -> Self {
        LockError::Config(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
