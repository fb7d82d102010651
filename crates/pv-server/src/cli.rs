//! Command-line interface.

use clap::Parser;
use std::path::PathBuf;

/// privoice - private voice rooms on demand
#[derive(Parser, Debug)]
#[command(name = "pv-server")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the config file
    #[arg(short, long, env = "PRIVOICE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Discord bot token
    #[arg(long, env = "TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Port for the liveness endpoint
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Prefix that marks a chat message as a command
    #[arg(long)]
    pub command_prefix: Option<String>,

    /// Marker prepended to every room name
    #[arg(long)]
    pub voice_prefix: Option<String>,

    /// Seconds between expiry sweeps
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Seconds a room may stay unjoined before it can be reclaimed
    #[arg(long)]
    pub channel_ttl_secs: Option<u64>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}
