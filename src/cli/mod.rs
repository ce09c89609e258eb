//! Command-line interface module
//!
//! This module handles argument parsing and output formatting.
//! It contains no business logic - that belongs in the [`crate::core`] module.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use crate::core::global_config::GlobalConfig;
use crate::infra::dirs::AppDirs;
use commands::{CommandContext, Commands};
use output::OutputConfig;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    "\nbuilt: ",
    env!("VERGEN_BUILD_TIMESTAMP"),
);

/// imgrelay - Talos image builder and multi-zone distributor
///
/// Build a Talos disk image onto a device, publish it as a cloud image and
/// replicate it to further zones under a stable name.
#[derive(Parser, Debug)]
#[command(name = "imgrelay")]
#[command(author, version, long_version = LONG_VERSION, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output in JSON format for scripting
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to config.toml in the config directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Output mode selected by the global flags
    pub fn output_config(&self) -> OutputConfig {
        OutputConfig::new(self.quiet, self.json, self.verbose)
    }

    /// Execute the CLI command
    pub async fn run(self) -> Result<()> {
        let Some(cmd) = self.command else {
            // No subcommand provided, show help
            use clap::CommandFactory;
            let mut cmd = Self::command();
            cmd.print_help()?;
            return Ok(());
        };

        let dirs = AppDirs::new();
        let config = match &self.config {
            Some(path) => GlobalConfig::load_from_path(path),
            None => GlobalConfig::load(&dirs),
        }
        .context("Failed to load configuration")?;

        let ctx = CommandContext {
            config,
            dirs,
            working_dir: std::env::current_dir()?,
        };
        cmd.run(&ctx).await
    }
}
