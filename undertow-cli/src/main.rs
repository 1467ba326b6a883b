//! Undertow CLI - Command-line interface
//!
//! Runs the streaming server against the simulated swarm and exposes the
//! subtitle tooling for local files.

mod commands;

use clap::Parser;
use undertow_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "undertow")]
#[command(about = "Progressive media streaming from torrent swarms")]
struct Cli {
    /// Console log level; RUST_LOG takes precedence
    #[arg(long, global = true, value_enum, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_tracing_level(), None).map_err(|e| anyhow::anyhow!(e))?;

    commands::handle_command(cli.command).await
}
