//! Parley - real-time voice conversation server
//!
//! Main entry point for the Parley CLI.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use parley_config::ConfigPaths;

mod client;
mod commands;

use commands::{config, start, status};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Parley - real-time voice conversation server
#[derive(Parser)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Server URL (default: http://127.0.0.1:8090)
    #[arg(long, global = true, env = "PARLEY_SERVER_URL")]
    pub server: Option<String>,

    /// Path to config file (overrides default discovery)
    #[arg(long, global = true, env = "PARLEY_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the Parley server
    Start(start::StartArgs),

    /// Show live connection, session and pool statistics
    Status(status::StatusArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

const CRATES: &[&str] = &[
    "parley",
    "parley_server",
    "parley_pool",
    "parley_session",
    "parley_config",
];

fn filter_for(level: &str, fallback: &str) -> String {
    let mut directives: Vec<String> = CRATES.iter().map(|c| format!("{}={}", c, level)).collect();
    directives.push(fallback.to_string());
    directives.join(",")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = commands::load(cli.config.as_deref())?;
    let logging = loaded.config.logging();

    // Initialize tracing: console (human-readable) + rotating JSON file
    let filter = if cli.verbose {
        filter_for("debug", "info")
    } else if let Some(level) = logging.level.as_deref() {
        filter_for(level, "warn")
    } else {
        filter_for("info", "warn")
    };

    let (file_layer, _guard) = if logging.file {
        let log_dir = logging
            .directory
            .clone()
            .or_else(|| ConfigPaths::discover().log_dir())
            .unwrap_or_else(|| PathBuf::from("logs"));
        let file_appender = tracing_appender::rolling::daily(&log_dir, "parley.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        (Some((non_blocking, filter_for("trace", "info"))), Some(guard))
    } else {
        (None, None)
    };

    use tracing_subscriber::prelude::*;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(file_layer.map(|(writer, file_filter)| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(tracing_subscriber::EnvFilter::new(file_filter))
        }))
        .init();

    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }

    let server_url = cli.server.unwrap_or_else(|| {
        loaded
            .config
            .server()
            .bind_address()
            .map(|addr| format!("http://{}", addr))
            .unwrap_or_else(|_| commands::DEFAULT_SERVER_URL.to_string())
    });

    let ctx = commands::Context {
        server_url,
        json_output: cli.json,
        verbose: cli.verbose,
        loaded,
    };

    match cli.command {
        Commands::Start(args) => start::run(args, &ctx).await,
        Commands::Status(args) => status::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}
