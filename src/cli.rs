use std::path::PathBuf;

use clap::Parser;

use crate::cmd::Commands;

/// Track client deliveries and schedule their tasks.
/// Configuration is read from ~/.dt/config.toml or the path passed via --config.
#[derive(Parser)]
#[command(name = "dt", version, about = "Delivery tracking dashboard")]
pub struct Cli {
    /// Path to the TOML config file. Its directory also holds the session and log.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Backend base URL, overriding the config file.
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}
