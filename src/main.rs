//! Command-line front end for the Veil session controller.

use clap::Parser;
use color_eyre::Result;
use tracing_subscriber::EnvFilter;
use veil::cli::args::Args;
use veil::{cli, config, constants};

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Logs go to stderr so command output stays pipeable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("{}=info", constants::APP_NAME))),
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse arguments
    let args = Args::parse();

    let config = cli::commands::apply_overrides(config::Config::load()?, &args)?;
    cli::commands::handle_command(args.command.as_ref(), &config)
}
