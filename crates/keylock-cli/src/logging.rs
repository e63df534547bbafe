//! Console logging for the keylock CLI
//!
//! Events go to stderr so command output on stdout stays clean. The filter
//! comes from `RUST_LOG`, falling back to `KEYLOCK_LOG_LEVEL`, then `info`.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt};

/// Logging configuration for the CLI
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: Level,
    /// Include module targets in each line
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            with_target: false,
        }
    }
}

impl LoggingConfig {
    /// Create from environment variables.
    pub fn from_env() -> Self {
        let level = std::env::var("KEYLOCK_LOG_LEVEL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Level::INFO);

        Self {
            level,
            ..Default::default()
        }
    }

    /// Raise the level to DEBUG when `verbose` is set
    pub fn verbose(mut self, verbose: bool) -> Self {
        if verbose {
            self.level = Level::DEBUG;
            self.with_target = true;
        }
        self
    }
}

pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    Registry::default()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(config.with_target),
        )
        .try_init()?;

    Ok(())
}
