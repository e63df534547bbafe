//! Command line arguments

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "keylock", version, about = "Run commands under a lease lock held in Redis")]
pub struct Cli {
    /// Redis server URL
    #[arg(
        long,
        global = true,
        env = "KEYLOCK_REDIS_URL",
        default_value = "redis://127.0.0.1:6379"
    )]
    pub redis_url: String,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Acquire the lock, run a command, then release the lock
    Exec(ExecArgs),
    /// Show the lease currently stored under a key
    Status(KeyArgs),
    /// Delete a lock key regardless of who holds it
    Break(KeyArgs),
}

#[derive(Debug, Args)]
pub struct KeyArgs {
    /// Lock key (ex. account:1, ...)
    #[arg(short, long)]
    pub key: String,
}

#[derive(Debug, Args)]
pub struct ExecArgs {
    /// Lock key; overrides the config file and environment
    #[arg(short, long)]
    pub key: Option<String>,

    /// Config file (toml, yaml or json)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Lease duration in milliseconds
    #[arg(long)]
    pub lease_ms: Option<u64>,

    /// Acquire timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Poll interval in milliseconds
    #[arg(long)]
    pub poll_ms: Option<u64>,

    /// Random extra delay per poll, in milliseconds
    #[arg(long)]
    pub jitter_ms: Option<u64>,

    /// Command to run while holding the lock
    #[arg(trailing_var_arg = true, required = true)]
    pub command: Vec<String>,
}
