//! Keylock - lease-based mutual exclusion over a shared key-value store
//!
//! This crate provides:
//! - Lock client with claim, expired-lease steal, and owner-scoped release
//! - Lease token codec (`<expiry millis>_<owner id>`)
//! - Store abstraction with in-memory and Redis backends
//! - Configuration loading from files and `KEYLOCK_*` environment variables
//! - Metrics and steal diagnostics

pub mod cancel;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod store;
pub mod token;

// Re-exports for convenience
pub use cancel::CancelHandle;
pub use client::{LockClient, ReleaseOutcome};
pub use config::{ConfigOverrides, LockConfig};
pub use error::{LockError, Result, StoreError};
pub use metrics::ContentionTracker;
pub use store::{LockStore, MemoryStore};
pub use token::LeaseToken;

#[cfg(feature = "redis")]
pub use store::RedisStore;
