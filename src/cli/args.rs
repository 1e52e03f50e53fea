//! Command-line argument definitions.

use clap::{Parser, Subcommand};

/// Veil - VPN session controller
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Catalog file (JSON) replacing the built-in server list
    #[arg(long, global = true, value_name = "FILE")]
    pub catalog: Option<String>,

    /// Telemetry sampling interval in milliseconds
    #[arg(long, global = true, value_name = "MS")]
    pub interval_ms: Option<u64>,

    /// Tunnel establishment timeout in milliseconds
    #[arg(long, global = true, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List servers grouped by country
    Servers {
        /// Only show this country (name or label)
        #[arg(long)]
        country: Option<String>,
    },
    /// Resolve and print the public IP address
    Ip,
    /// Connect to a random online server in a country, print telemetry, then disconnect
    Connect {
        /// Country to connect to (name or label)
        country: String,
        /// Number of telemetry samples to print before disconnecting
        #[arg(long, default_value_t = 5)]
        samples: usize,
    },
}
