//! CLI command definitions
//!
//! Defines the clap commands for the wstester CLI.

use clap::Subcommand;
use std::path::PathBuf;

use crate::common::parse_key_value;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a test scenario (JSON or YAML)
    Run {
        /// Path to the scenario file
        scenario: PathBuf,

        /// Override a scenario variable: --var HOST=localhost
        /// Can be specified multiple times
        #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        vars: Vec<(String, String)>,

        /// Print the result document as JSON instead of the report
        #[arg(long)]
        json: bool,
    },

    /// Check a scenario file without running it
    Validate {
        /// Path to the scenario file
        scenario: PathBuf,
    },

    /// Connect to an endpoint and watch the traffic
    Watch {
        /// WebSocket URL (ws:// or wss://)
        url: String,

        /// Speak STOMP over the WebSocket
        #[arg(long)]
        stomp: bool,

        /// Bearer token sent as the Authorization header
        #[arg(long)]
        token: Option<String>,

        /// Extra CONNECT header (STOMP only)
        #[arg(long = "header", short = 'H', value_name = "KEY=VALUE", value_parser = parse_key_value)]
        headers: Vec<(String, String)>,

        /// Subscribe to a destination (STOMP only)
        #[arg(long = "subscribe", short = 's', value_name = "DESTINATION")]
        subscriptions: Vec<String>,

        /// Message to send once connected
        #[arg(long)]
        send: Option<String>,

        /// Destination for --send (STOMP only)
        #[arg(long, short)]
        destination: Option<String>,

        /// Seconds to keep listening before disconnecting
        #[arg(long, default_value = "5")]
        listen: u64,
    },

    /// Show the effective configuration
    Config {
        /// Write a default configuration file if none exists
        #[arg(long)]
        init: bool,
    },
}
