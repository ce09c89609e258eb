//! imgrelay CLI - Talos image builder and multi-zone distributor
//!
//! Entry point for the imgrelay command-line application.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use imgrelay::cli::output::{display_error, OutputConfig};
use imgrelay::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Apply output configuration globally
    let output_config: OutputConfig = cli.output_config();
    output_config.apply_global();

    // RUST_LOG wins over the verbosity flags
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(output_config.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Run the command and handle errors
    match cli.run().await {
        Ok(()) => Ok(()),
        Err(e) => {
            display_error(&e);
            std::process::exit(1);
        }
    }
}
