//! CLI implementation for `imgrelay publish`
//!
//! Snapshots the written volume, publishes the versioned-unique image and
//! records it in `manifest.json` for the distribution stage.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use super::CommandContext;
use crate::cli::output;
use crate::config::defaults::MANIFEST_PATH;
use crate::core::manifest::{BuildManifest, BuildRecord};
use crate::core::model::{ZoneId, ZoneImage};
use crate::core::naming::versioned_name;
use crate::core::publish::{PublishRequest, SnapshotPublisher};
use crate::infra::cloud::CloudProvider;

/// Options for `imgrelay publish`
#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub zone: String,
    pub volume: String,
    pub version: String,
    pub prefix: Option<String>,
}

/// Run identifier recorded in the manifest, UUID-shaped
fn run_uuid(image: &ZoneImage, at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image.zone.as_str().as_bytes());
    hasher.update(image.image_id.as_bytes());
    hasher.update(at.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    let hex = hex::encode(hasher.finalize());
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// Manifest entry for a published image
pub fn build_record(image: &ZoneImage, at: DateTime<Utc>) -> BuildRecord {
    BuildRecord {
        name: "talos".to_string(),
        builder_type: "scaleway".to_string(),
        build_time: at.timestamp(),
        artifact_id: format!("{}:{}", image.zone, image.image_id),
        packer_run_uuid: run_uuid(image, at),
        custom_data: None,
    }
}

/// Execute the publish command
pub async fn execute(
    ctx: &CommandContext,
    cloud: Arc<dyn CloudProvider>,
    options: PublishOptions,
) -> Result<()> {
    let config = &ctx.config;
    let now = Utc::now();
    let prefix = options
        .prefix
        .as_deref()
        .unwrap_or_else(|| config.image_prefix());

    let request = PublishRequest {
        zone: ZoneId::new(options.zone),
        volume_id: options.volume,
        name: versioned_name(prefix, &options.version, now),
        version: options.version,
        arch: config.architecture().to_string(),
    };

    let spinner = output::create_spinner(&format!("Publishing {}", request.name));
    let published = SnapshotPublisher::new(cloud.as_ref(), config.poll_settings())
        .publish(&request)
        .await;
    spinner.finish_and_clear();
    let image = published?;

    let manifest_path = ctx.working_dir.join(MANIFEST_PATH);
    let mut manifest = BuildManifest::load_or_default(&manifest_path)?;
    manifest.record(build_record(&image, now));
    manifest
        .save(&manifest_path)
        .with_context(|| format!("Image {} was published but not recorded", image.image_id))?;

    output::print_image(&image)
}
