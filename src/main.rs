//! # DT - Delivery Tracking Dashboard
//!
//! A terminal dashboard for following client deliveries and planning the tasks
//! inside them.
//!
//! ## Key Features
//!
//! - **Delivery Directory**: Deliveries are loaded page by page, deduplicated by
//!   code, and can be searched by client, filtered to one client and sorted by
//!   initiation date
//! - **Delivery Detail**: Every task of a delivery with its responsible person
//!   and the time already booked against it
//! - **Task Scheduler**: Spread a task over a date range, plan minutes per day
//!   without pushing anyone past 8 hours a day, pick a delivery slot and submit
//! - **Two Interfaces**: Scriptable CLI plus an interactive TUI over the same core
//!
//! ## Quick Start
//!
//! ```bash
//! # Start a session with the token issued by the identity provider
//! dt login eyJhbGciOi...
//!
//! # Browse interactively
//! dt ui
//!
//! # Or from the shell
//! dt list --search vedam --sort latest
//! dt view DEL-42
//! dt schedule DEL-42 1042 --start 2024-06-01 --days 3 \
//!     --duration 120 --duration 90 --duration 60 --slot 4pm
//! ```
//!
//! The backend URL and log filter live in `~/.dt/config.toml`; the session and
//! the log file (`dt.log`) are kept next to it.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

pub mod api;
pub mod cli;
pub mod cmd;
pub mod config;
pub mod delivery;
pub mod detail;
pub mod directory;
pub mod error;
pub mod fields;
pub mod scheduler;
pub mod session;
pub mod tui {
    pub mod app;
    pub mod colors;
    pub mod enums;
    pub mod input;
    pub mod run;
    pub mod schedule_form;
    pub mod utils;
    pub mod worker;
}

use cli::Cli;
use cmd::*;
use config::Config;
use error::AppError;

fn main() {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        cmd_completions(*shell);
        return;
    }

    if let Err(e) = run(cli) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), AppError> {
    let config_path = match cli.config {
        Some(path) => path,
        None => Config::default_dir()?.join("config.toml"),
    };
    let state_dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&state_dir)?;

    let mut config = Config::load(&config_path)?;
    if let Some(url) = cli.api_url {
        config.api_base_url = url.trim_end_matches('/').to_string();
    }
    init_logging(&state_dir, &config.log_filter);

    let ctx = Context {
        config,
        state_dir,
        runtime: tokio::runtime::Runtime::new()?,
    };

    match cli.command {
        Commands::Ui => cmd_ui(&ctx),
        Commands::Login { token } => cmd_login(&ctx, &token),
        Commands::Logout => cmd_logout(&ctx),
        Commands::Whoami => cmd_whoami(&ctx),
        Commands::List { pages, search, client, sort } => cmd_list(&ctx, pages, search, client, sort),
        Commands::View { code } => cmd_view(&ctx, &code),
        Commands::Schedule {
            code, key, mode, name, start, days, durations, person, slot, dry_run,
        } => cmd_schedule(&ctx, code, key, mode, name, start, days, durations, person, slot, dry_run),
        Commands::Delete { code, yes } => cmd_delete(&ctx, &code, yes),
        Commands::Completions { shell } => {
            cmd_completions(shell);
            Ok(())
        }
    }
}

/// Send logs to `dt.log` in the state directory; the terminal belongs to the UI.
fn init_logging(state_dir: &Path, default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let log_path = state_dir.join("dt.log");
    let registry = Registry::default().with(filter);
    match OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => {
            let _ = registry
                .with(fmt::layer().with_target(false).with_ansi(false).with_writer(Mutex::new(file)))
                .try_init();
        }
        Err(e) => {
            eprintln!("Failed to open log file {}: {}", log_path.display(), e);
            let _ = registry
                .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
                .try_init();
        }
    }
}
