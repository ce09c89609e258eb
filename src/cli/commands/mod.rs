//! CLI command implementations
//!
//! Each command is implemented in its own submodule.

pub mod build;
pub mod publish;
pub mod run;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use crate::core::global_config::GlobalConfig;
use crate::core::naming::{NamingStrategy, TimestampSuffix};
use crate::infra::cloud::CloudProvider;
use crate::infra::dirs::AppDirs;
use crate::infra::scaleway::{ScalewayCloud, ScalewayConfig};

/// State shared by every command
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub config: GlobalConfig,
    pub dirs: AppDirs,
    /// Directory holding `manifest.json`
    pub working_dir: PathBuf,
}

/// Cloud API credentials
#[derive(Args, Debug, Clone)]
pub struct CloudArgs {
    /// API secret key
    #[arg(long, env = "SCW_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Project owning the snapshots and images
    #[arg(long, env = "SCW_DEFAULT_PROJECT_ID")]
    pub project_id: Option<String>,
}

impl CloudArgs {
    /// Cloud client for these credentials
    pub fn connect(&self, config: &GlobalConfig) -> Result<Arc<dyn CloudProvider>> {
        let secret_key = self
            .secret_key
            .clone()
            .context("Missing API secret key: pass --secret-key or set SCW_SECRET_KEY")?;
        let project_id = self
            .project_id
            .clone()
            .or_else(|| config.cloud.project_id.clone())
            .context("Missing project id: pass --project-id or set SCW_DEFAULT_PROJECT_ID")?;

        let scaleway = ScalewayConfig::new(secret_key, project_id)
            .with_api_url(config.api_url())
            .with_volume_type(config.volume_type());
        Ok(Arc::new(ScalewayCloud::new(scaleway)))
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build an image from a schematic and write it to a device
    Build(build::BuildArgs),

    /// Snapshot a written volume and publish it as an image
    Publish {
        /// Zone holding the volume
        #[arg(long)]
        zone: String,

        /// Volume the image was written to
        #[arg(long)]
        volume: String,

        /// Release tag, e.g. v1.11.5
        #[arg(long)]
        talos_version: String,

        /// Image name prefix
        #[arg(long)]
        prefix: Option<String>,

        #[command(flatten)]
        cloud: CloudArgs,
    },

    /// Replicate the last published image and update stable aliases
    Run {
        /// Bucket used as the relay between zones
        bucket: String,

        /// Zones to distribute to (defaults from config)
        zones: Vec<String>,

        #[command(flatten)]
        cloud: CloudArgs,
    },

    /// Show what `run` would do without changing anything
    Plan {
        /// Bucket used as the relay between zones
        bucket: String,

        /// Zones to distribute to (defaults from config)
        zones: Vec<String>,

        #[command(flatten)]
        cloud: CloudArgs,
    },

    /// Print the stable name of a versioned image name
    StableName {
        /// Versioned-unique image name
        name: String,
    },
}

impl Commands {
    /// Execute the command
    pub async fn run(self, ctx: &CommandContext) -> Result<()> {
        match self {
            Self::Build(args) => build::execute(ctx, args).await,
            Self::Publish {
                zone,
                volume,
                talos_version,
                prefix,
                cloud,
            } => {
                let cloud = cloud.connect(&ctx.config)?;
                let options = publish::PublishOptions {
                    zone,
                    volume,
                    version: talos_version,
                    prefix,
                };
                publish::execute(ctx, cloud, options).await
            }
            Self::Run {
                bucket,
                zones,
                cloud,
            } => run::execute_run(ctx, &cloud, &bucket, &zones).await,
            Self::Plan {
                bucket,
                zones,
                cloud,
            } => run::execute_plan(ctx, &cloud, &bucket, &zones).await,
            Self::StableName { name } => {
                let stable = TimestampSuffix.stable_name(&name);
                if super::output::OutputConfig::global().json {
                    super::output::print_json(&serde_json::json!({
                        "name": name,
                        "stable_name": stable,
                    }))
                } else {
                    println!("{stable}");
                    Ok(())
                }
            }
        }
    }
}
