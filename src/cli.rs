//! CLI definitions for rvidctl.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[clap(
    name = "rvidctl",
    version,
    about = "ST 2110-21 / RFC 4175 video-over-IP transmit and receive engine\n\nDrive kernel-bypass-modeled TX/RX sessions, watch pacing and queue health live.",
    long_about = None
)]
pub struct Cli {
    /// Path to sessions.toml config file
    #[clap(long, short, default_value = "sessions.toml")]
    pub config: PathBuf,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List local network interfaces and their addresses
    Discover,

    /// Run every TX/RX session in sessions.toml until Ctrl-C
    Run {
        /// Stats snapshot interval in seconds
        #[clap(long, default_value = "1")]
        interval: u64,
    },

    /// Run a single named TX session until Ctrl-C
    Tx {
        /// Session name from sessions.toml
        session: String,
    },

    /// Run a single named RX session until Ctrl-C, dumping frames if configured
    Rx {
        /// Session name from sessions.toml
        session: String,
    },

    /// Run every session for a fixed duration and emit a JSON report
    Bench {
        /// How many seconds to run the benchmark
        #[clap(long, default_value = "10")]
        duration: u64,

        /// Write JSON report to this file (default: stdout)
        #[clap(long)]
        output: Option<PathBuf>,
    },

    /// Live-updating session/port dashboard (Ctrl-C to stop)
    Monitor {
        /// Dashboard refresh interval in seconds
        #[clap(long, default_value = "2")]
        interval: u64,
    },

    /// Print the most recent snapshot from the metrics log
    Status,

    /// Manage the rvidctl systemd service
    Service {
        #[clap(subcommand)]
        action: ServiceAction,
    },

    /// Print an example sessions.toml to stdout
    Init,
}

#[derive(Subcommand)]
pub enum ServiceAction {
    Install,
    Uninstall,
    Start,
    Stop,
    Restart,
}
