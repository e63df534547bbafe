//! Lock client configuration
//!
//! Values come from an optional config file layered under `KEYLOCK_*`
//! environment variables. Every field except `key` has a default.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{LockError, Result};

/// Default lease duration (milliseconds)
pub const DEFAULT_LEASE_MS: u64 = 60_000;

/// Default acquire timeout (milliseconds)
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 10_000;

/// Default poll interval between acquisition attempts (milliseconds)
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Environment variable prefix, e.g. `KEYLOCK_LEASE_MS`
pub const ENV_PREFIX: &str = "KEYLOCK";

/// Lock client settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lock key (ex. account:1, ...)
    pub key: String,
    /// Lease duration in milliseconds
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,
    /// Acquire timeout in milliseconds
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Sleep between attempts while the key is held
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound of random extra sleep per poll (0 = fixed interval)
    #[serde(default)]
    pub poll_jitter_ms: u64,
}

/// Values that take precedence over file and environment, e.g. CLI flags
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub key: Option<String>,
    pub lease_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub poll_jitter_ms: Option<u64>,
}

fn default_environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn default_lease_ms() -> u64 {
    DEFAULT_LEASE_MS
}

fn default_acquire_timeout_ms() -> u64 {
    DEFAULT_ACQUIRE_TIMEOUT_MS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl LockConfig {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            lease_ms: DEFAULT_LEASE_MS,
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            poll_jitter_ms: 0,
        }
    }

    pub fn with_lease_ms(mut self, lease_ms: u64) -> Self {
        self.lease_ms = lease_ms;
        self
    }

    pub fn with_acquire_timeout_ms(mut self, acquire_timeout_ms: u64) -> Self {
        self.acquire_timeout_ms = acquire_timeout_ms;
        self
    }

    pub fn with_poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    pub fn with_poll_jitter_ms(mut self, poll_jitter_ms: u64) -> Self {
        self.poll_jitter_ms = poll_jitter_ms;
        self
    }

    /// Load from an optional file plus `KEYLOCK_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_overrides(path, &ConfigOverrides::default())
    }

    /// Load like [`load`](Self::load), then apply explicit overrides on top
    pub fn load_with_overrides(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<Self> {
        Self::build(path, default_environment(), overrides)
    }

    /// Load with an explicit environment source layered over the file
    pub fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self> {
        Self::build(path, env, &ConfigOverrides::default())
    }

    fn build(path: Option<&Path>, env: Environment, overrides: &ConfigOverrides) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("lease_ms", DEFAULT_LEASE_MS)?
            .set_default("acquire_timeout_ms", DEFAULT_ACQUIRE_TIMEOUT_MS)?
            .set_default("poll_interval_ms", DEFAULT_POLL_INTERVAL_MS)?
            .set_default("poll_jitter_ms", 0u64)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        let config: LockConfig = builder
            .add_source(env)
            .set_override_option("key", overrides.key.clone())?
            .set_override_option("lease_ms", overrides.lease_ms)?
            .set_override_option("acquire_timeout_ms", overrides.acquire_timeout_ms)?
            .set_override_option("poll_interval_ms", overrides.poll_interval_ms)?
            .set_override_option("poll_jitter_ms", overrides.poll_jitter_ms)?
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.key.trim().is_empty() {
            return Err(LockError::Config("lock key must not be empty".to_string()));
        }
        if self.lease_ms == 0 {
            return Err(LockError::Config(
                "lease_ms must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(LockError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_jitter(&self) -> Duration {
        Duration::from_millis(self.poll_jitter_ms)
    }
}
