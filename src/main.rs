//! wstester - WebSocket and STOMP connection tester
//!
//! Connects to WebSocket endpoints to watch their traffic and runs
//! scripted test scenarios against them.

use std::path::PathBuf;

use clap::Parser;
use wstester::cli::{self, CliContext};
use wstester::commands::Commands;
use wstester::common::config::Config;
use wstester::common::logging;

#[derive(Parser)]
#[command(name = "wstester", about = "WebSocket and STOMP connection tester")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: platform config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Also write diagnostics to this file
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Verbose output
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let _log_guard = logging::init_cli(cli.verbose, cli.log_file.as_deref());

    let config = match &cli.config {
        Some(path) if path.exists() => Config::load_from(path),
        Some(path) => {
            // `config --init` is how a missing file gets created
            if !matches!(cli.command, Commands::Config { init: true }) {
                eprintln!(
                    "Warning: configuration file {} not found, using defaults",
                    path.display()
                );
            }
            Ok(Config::default())
        }
        None => Config::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let ctx = CliContext {
        config,
        config_path: cli.config,
        verbose: cli.verbose,
    };

    match cli::dispatch(cli.command, ctx).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
