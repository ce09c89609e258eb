//! CLI implementation for `imgrelay run` and `imgrelay plan`

use std::sync::Arc;

use anyhow::{Context, Result};

use super::{CloudArgs, CommandContext};
use crate::cli::output;
use crate::config::defaults::MANIFEST_PATH;
use crate::core::distribute::Distributor;
use crate::core::global_config::GlobalConfig;
use crate::core::model::ZoneId;
use crate::core::naming::TimestampSuffix;
use crate::core::pipeline::Pipeline;
use crate::core::reconcile::{AliasReconciler, ReconcileOptions};
use crate::infra::cloud::CloudProvider;

/// Wire the distribution pipeline from configuration
pub fn build_pipeline(config: &GlobalConfig, cloud: Arc<dyn CloudProvider>) -> Pipeline {
    let polls = config.poll_settings();
    let distributor = Distributor::new(cloud.clone(), Arc::new(TimestampSuffix), polls)
        .with_workers(config.workers());
    let reconciler = AliasReconciler::new(
        cloud.clone(),
        polls,
        ReconcileOptions {
            keep_versioned_in_targets: config.keep_versioned_in_targets(),
            prune_snapshots: config.prune_snapshots(),
        },
    );
    Pipeline::new(cloud, distributor, reconciler)
}

/// Zones named on the command line, else the configured ones
fn requested_zones(config: &GlobalConfig, zones: &[String]) -> Vec<ZoneId> {
    if zones.is_empty() {
        config.default_zones()
    } else {
        zones.iter().map(|z| ZoneId::new(z.as_str())).collect()
    }
}

/// Execute the run command
pub async fn execute_run(
    ctx: &CommandContext,
    cloud: &CloudArgs,
    bucket: &str,
    zones: &[String],
) -> Result<()> {
    let manifest_path = ctx.working_dir.join(MANIFEST_PATH);
    if !manifest_path.exists() {
        anyhow::bail!(
            "No {} found in {}. Run 'imgrelay publish' first.",
            MANIFEST_PATH,
            ctx.working_dir.display()
        );
    }

    let pipeline = build_pipeline(&ctx.config, cloud.connect(&ctx.config)?);
    let origin = pipeline
        .origin_from_manifest(&manifest_path)
        .await
        .context("Failed to locate the origin image")?;
    let zones = requested_zones(&ctx.config, zones);

    let spinner = output::create_spinner(&format!("Distributing {}", origin.name));
    let summary = pipeline.run(origin, bucket, &zones).await;
    spinner.finish_and_clear();

    output::print_summary(&summary)?;
    match summary.error() {
        Some(e) => Err(e).context(format!("Distribution of {} incomplete", summary.stable_name)),
        None => Ok(()),
    }
}

/// Execute the plan command
pub async fn execute_plan(
    ctx: &CommandContext,
    cloud: &CloudArgs,
    bucket: &str,
    zones: &[String],
) -> Result<()> {
    let manifest_path = ctx.working_dir.join(MANIFEST_PATH);
    let pipeline = build_pipeline(&ctx.config, cloud.connect(&ctx.config)?);
    let origin = pipeline
        .origin_from_manifest(&manifest_path)
        .await
        .context("Failed to locate the origin image")?;
    let zones = requested_zones(&ctx.config, zones);

    let plan = pipeline.plan(origin, bucket, &zones).await;
    output::print_plan(&plan)
}
