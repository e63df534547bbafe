//! keylock - run commands under a lease lock held in Redis

mod cli;
mod commands;
mod logging;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use keylock::{LockStore, RedisStore};
use tracing::error;

use cli::{Cli, Command};
use logging::LoggingConfig;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init_logging(&LoggingConfig::from_env().verbose(cli.verbose)) {
        eprintln!("failed to initialize logging: {}", e);
    }
    keylock::metrics::describe_metrics();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let store: Arc<dyn LockStore> = Arc::new(
        RedisStore::connect(&cli.redis_url)
            .await
            .with_context(|| format!("failed to connect to {}", cli.redis_url))?,
    );

    match cli.command {
        Command::Exec(args) => commands::exec(store, args).await,
        Command::Status(args) => commands::status(store, args).await,
        Command::Break(args) => commands::force_break(store, args).await,
    }
}
