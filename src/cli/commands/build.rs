//! CLI implementation for `imgrelay build`
//!
//! Resolves the schematic, fetches and decompresses the image, and writes it
//! to the target device. The process exits as soon as the write completes:
//! the host's own disk may just have been replaced.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use super::CommandContext;
use crate::cli::output::{self, status, OutputConfig};
use crate::config::defaults::EXIT_FATAL_WRITE;
use crate::core::build::{run_build, BuildRequest, FetchRetry};
use crate::core::model::{BuildSpecification, Codec};
use crate::error::BuildError;
use crate::infra::device::WriteOptions;
use crate::infra::factory::HttpImageFactory;

/// Arguments of `imgrelay build`
#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Schematic document submitted to the image factory
    #[arg(long, value_name = "FILE")]
    pub schematic: PathBuf,

    /// Release tag, e.g. v1.11.5
    #[arg(long)]
    pub talos_version: String,

    /// Block device to overwrite
    #[arg(long, value_name = "PATH")]
    pub device: PathBuf,

    /// Factory platform (defaults from config)
    #[arg(long)]
    pub platform: Option<String>,

    /// Compression codec of the factory image: xz or gz
    #[arg(long)]
    pub codec: Option<String>,

    /// Directory for the downloaded and raw images
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Accept a regular file as the target device
    #[arg(long)]
    pub allow_file_target: bool,
}

fn read_specification(path: &Path) -> Result<BuildSpecification, BuildError> {
    std::fs::read(path)
        .map(BuildSpecification::new)
        .map_err(|e| BuildError::Specification {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
}

/// Execute the build command
pub async fn execute(ctx: &CommandContext, args: BuildArgs) -> Result<()> {
    let config = &ctx.config;
    let specification = read_specification(&args.schematic)?;
    let codec = match &args.codec {
        Some(ext) => Codec::from_extension(ext).map_err(BuildError::from)?,
        None => config.codec()?,
    };

    let request = BuildRequest {
        specification,
        version: args.talos_version,
        platform: args.platform.unwrap_or_else(|| config.platform().to_string()),
        codec,
        device: args.device,
        work_dir: args.work_dir.unwrap_or_else(|| ctx.dirs.work_dir()),
        write: WriteOptions {
            allow_regular_file: args.allow_file_target,
            ..WriteOptions::default()
        },
        retry: FetchRetry {
            window: config.fetch_retry_window(),
            ..FetchRetry::default()
        },
    };

    let factory = HttpImageFactory::with_url(config.factory_url());
    let bar = output::create_download_bar();
    let progress = output::download_progress(&bar);

    let result = run_build(&factory, &request, Some(&progress)).await;
    bar.finish_and_clear();

    match result {
        Ok(outcome) => {
            if OutputConfig::global().json {
                output::print_json(&serde_json::json!({
                    "schematic": outcome.artifact.id,
                    "version": outcome.artifact.version,
                    "sha256": outcome.download.checksum,
                    "device": outcome.write.device,
                    "bytes_written": outcome.write.bytes_written,
                }))?;
            } else if !OutputConfig::global().quiet {
                println!(
                    "{} Wrote {} bytes of {} {} to {}",
                    status::SUCCESS,
                    outcome.write.bytes_written,
                    outcome.artifact.id,
                    outcome.artifact.version,
                    outcome.write.device.display()
                );
            }
            std::process::exit(0);
        }
        Err(e) if e.is_fatal() => {
            output::display_fatal_write(&e);
            std::process::exit(EXIT_FATAL_WRITE);
        }
        Err(e) => Err(e).context("Build failed"),
    }
}
