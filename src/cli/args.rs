use blobmux::utils::parse_duration;
use blobmux::{LockConfig, MuxConfig, RetryPolicy};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "blobmux",
    version,
    about = "Distribute a fixed list of work items to many workers through shared storage",
    long_about = None
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Store root directory (default: platform data dir)
    #[arg(long, value_name = "DIR", env = "BLOBMUX_ROOT", global = true)]
    pub root: Option<PathBuf>,

    /// Lock ttl before a holder is presumed dead
    #[arg(
        long,
        value_name = "DURATION",
        default_value = "120s",
        env = "BLOBMUX_LOCK_TTL",
        value_parser = duration_arg,
        global = true
    )]
    pub ttl: Duration,

    /// How long to wait for a busy lock
    #[arg(
        long,
        value_name = "DURATION",
        default_value = "300s",
        env = "BLOBMUX_ACQUIRE_TIMEOUT",
        value_parser = duration_arg,
        global = true
    )]
    pub acquire_timeout: Duration,

    /// Pause between lock attempts
    #[arg(
        long,
        value_name = "DURATION",
        default_value = "100ms",
        env = "BLOBMUX_POLL_INTERVAL",
        value_parser = duration_arg,
        global = true
    )]
    pub poll_interval: Duration,

    /// Attempts per storage operation on transient failures
    #[arg(long, value_name = "N", default_value_t = 5, env = "BLOBMUX_RETRIES", global = true)]
    pub retries: u32,

    /// Verbose output
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

impl Args {
    pub fn mux_config(&self) -> MuxConfig {
        let retry = RetryPolicy::default().with_max_attempts(self.retries);
        let lock = LockConfig::default()
            .with_ttl(self.ttl)
            .with_acquire_timeout(self.acquire_timeout)
            .with_poll_interval(self.poll_interval)
            .with_retry(retry.clone())
            .with_release_retry(retry.clone());
        MuxConfig::default().with_lock(lock).with_retry(retry)
    }
}

fn duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Store elements (one per line) and print the primary session id
    New {
        /// Storage location of the multiplexer
        #[arg(value_name = "LOCATION")]
        location: String,

        /// Read elements from file instead of stdin
        #[arg(short, long, value_name = "FILE")]
        input: Option<PathBuf>,

        /// Replace an existing multiplexer at LOCATION
        #[arg(long)]
        overwrite: bool,
    },

    /// Start another read session and print its id
    Session {
        #[arg(value_name = "LOCATION")]
        location: String,
    },

    /// Claim elements and print them, one per line
    Drain {
        #[arg(value_name = "SESSION")]
        session: String,

        /// Stop after N elements
        #[arg(long, value_name = "N")]
        limit: Option<usize>,

        /// Worker name recorded with each claim
        #[arg(long, value_name = "ID")]
        worker: Option<String>,
    },

    /// Print whether every element of a session was handed out
    Done {
        #[arg(value_name = "SESSION")]
        session: String,
    },

    /// Print a session's control state as JSON
    Stat {
        #[arg(value_name = "SESSION")]
        session: String,
    },

    /// Delete a multiplexer and all its sessions
    Destroy {
        #[arg(value_name = "LOCATION")]
        location: String,
    },

    /// Remove expired lock records
    Housekeep {
        /// Only look below this prefix (default: whole store)
        #[arg(value_name = "PREFIX", default_value = "")]
        prefix: String,

        /// Show what would be deleted without deleting
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
}
