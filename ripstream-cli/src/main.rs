//! Ripstream CLI - Command-line interface
//!
//! Runs the streaming server or probes a media URL.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use ripstream_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "ripstream")]
#[command(about = "Streams torrent files over HTTP while they download")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,

    /// Console log level
    #[arg(long, global = true, value_enum, default_value = "info")]
    log_level: CliLogLevel,

    /// Directory for the full trace log of this run
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_path = init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())?;
    tracing::debug!("Full trace log at {}", log_path.display());

    commands::handle_command(cli.command).await
}
