//! Subcommand handlers

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use keylock::token::current_timestamp;
use keylock::{ConfigOverrides, LockClient, LockConfig, LockError, LockStore, ReleaseOutcome};
use tokio::process::Command;
use tracing::{info, warn};

use crate::cli::{ExecArgs, KeyArgs};

/// Exit code when the lock could not be acquired before the timeout
pub const EXIT_NOT_ACQUIRED: u8 = 2;

/// Exit code when acquisition was interrupted
pub const EXIT_ABORTED: u8 = 130;

pub fn exec_config(args: &ExecArgs) -> keylock::Result<LockConfig> {
    let overrides = ConfigOverrides {
        key: args.key.clone(),
        lease_ms: args.lease_ms,
        acquire_timeout_ms: args.timeout_ms,
        poll_interval_ms: args.poll_ms,
        poll_jitter_ms: args.jitter_ms,
    };
    LockConfig::load_with_overrides(args.config.as_deref(), &overrides)
}

pub async fn exec(store: Arc<dyn LockStore>, args: ExecArgs) -> anyhow::Result<ExitCode> {
    let config = exec_config(&args).context("failed to load lock configuration")?;
    let lock = LockClient::from_config(store, &config)?;

    // Ctrl-C while waiting aborts the acquisition
    let cancel = lock.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let acquired = lock.acquire().await;
    interrupt.abort();

    match acquired {
        Ok(true) => {}
        Ok(false) => {
            warn!(key = %config.key, timeout_ms = config.acquire_timeout_ms, "Lock not acquired before timeout");
            return Ok(ExitCode::from(EXIT_NOT_ACQUIRED));
        }
        Err(LockError::Aborted) => {
            warn!(key = %config.key, "Interrupted while waiting for lock");
            return Ok(ExitCode::from(EXIT_ABORTED));
        }
        Err(e) => return Err(e).context("failed to acquire lock"),
    }

    let (program, program_args) = args
        .command
        .split_first()
        .context("no command given")?;
    info!(key = %config.key, command = %program, "Running command under lock");

    let status = Command::new(program).args(program_args).status().await;

    match lock.release().await {
        Ok(ReleaseOutcome::Lost) => {
            warn!(key = %config.key, "Lease expired while the command ran; another holder may have overlapped");
        }
        Ok(_) => {}
        Err(e) => warn!(key = %config.key, error = %e, "Failed to release lock"),
    }

    let status = status.with_context(|| format!("failed to run '{}'", program))?;
    Ok(match status.code() {
        Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        None => ExitCode::FAILURE,
    })
}

pub async fn status(store: Arc<dyn LockStore>, args: KeyArgs) -> anyhow::Result<ExitCode> {
    let lock = LockClient::new(store, args.key.clone());

    let Some(token) = lock.current_lease().await? else {
        println!("{}: free", args.key);
        return Ok(ExitCode::SUCCESS);
    };

    let now = current_timestamp();
    let state = if token.is_expired_at(now) {
        "expired".to_string()
    } else {
        format!("held, {} ms left", token.remaining(now).as_millis())
    };
    println!("{}: {}", args.key, state);
    println!("  token:   {}", token);
    println!("  owner:   {}", token.owner().unwrap_or("(legacy, none)"));
    println!("  expires: {}", format_millis(token.expires_at()));
    Ok(ExitCode::SUCCESS)
}

pub async fn force_break(store: Arc<dyn LockStore>, args: KeyArgs) -> anyhow::Result<ExitCode> {
    let previous = store.get(&args.key).await?;
    store.delete(&args.key).await?;

    match previous {
        Some(value) => {
            warn!(key = %args.key, token = %value, "Lock key force-deleted");
            println!("{}: deleted {}", args.key, value);
        }
        None => println!("{}: already free", args.key),
    }
    Ok(ExitCode::SUCCESS)
}

fn format_millis(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| millis.to_string())
}
