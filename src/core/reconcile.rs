//! Stable alias reconciliation
//!
//! Leaves exactly one image carrying the stable name in a zone. The new alias
//! is always created and confirmed before any superseded image is deleted, so
//! the stable name never disappears. Cleanup failures become
//! [`ReconciliationWarning`]s and never fail the zone.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use super::global_config::PollSettings;
use super::model::{ImageRequest, ImageState, ZoneId, ZoneImage};
use super::naming::version_token;
use super::publish::{confirm_image, create_confirmed_image, image_tags};
use crate::error::{ReconcileError, ReconciliationWarning};
use crate::infra::cloud::CloudProvider;

/// Cleanup switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Keep the versioned-unique image in target zones
    pub keep_versioned_in_targets: bool,
    /// Delete snapshots no longer referenced by any image
    pub prune_snapshots: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            keep_versioned_in_targets: false,
            prune_snapshots: true,
        }
    }
}

/// Zone role during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneRole {
    /// The zone the build was published in; keeps its versioned image
    Origin,
    /// A zone the image was replicated into
    Target,
}

/// Result of reconciling one zone
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    pub zone: ZoneId,
    /// The image now carrying the stable name
    pub stable_image: ZoneImage,
    /// Whether an existing alias already wrapped the new snapshot
    pub reused: bool,
    /// Superseded images that were deleted
    pub removed_images: Vec<String>,
    pub pruned_snapshots: Vec<String>,
    pub warnings: Vec<ReconciliationWarning>,
}

/// Maintains the stable alias in each zone
#[derive(Clone)]
pub struct AliasReconciler {
    cloud: Arc<dyn CloudProvider>,
    polls: PollSettings,
    options: ReconcileOptions,
}

impl AliasReconciler {
    pub fn new(
        cloud: Arc<dyn CloudProvider>,
        polls: PollSettings,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            cloud,
            polls,
            options,
        }
    }

    /// Point `stable_name` at `new_image` in `zone`
    ///
    /// On error nothing has been deleted.
    pub async fn reconcile(
        &self,
        zone: &ZoneId,
        stable_name: &str,
        new_image: &ZoneImage,
        role: ZoneRole,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let existing: Vec<ZoneImage> = self
            .cloud
            .list_images(zone, Some(stable_name))
            .await
            .map_err(|e| ReconcileError::List {
                zone: zone.clone(),
                name: stable_name.to_string(),
                error: e.to_string(),
            })?
            .into_iter()
            .filter(|i| i.name == stable_name)
            .collect();

        let (stable_image, reused) =
            self.establish_alias(zone, stable_name, new_image, &existing).await?;

        let mut outcome = ReconcileOutcome {
            zone: zone.clone(),
            stable_image,
            reused,
            removed_images: Vec::new(),
            pruned_snapshots: Vec::new(),
            warnings: Vec::new(),
        };

        // Alias confirmed; superseded images can go
        let alias_id = outcome.stable_image.image_id.clone();
        let mut orphaned = Vec::new();
        for old in existing.iter().filter(|i| i.image_id != alias_id) {
            if self.remove_image(zone, old, &mut outcome).await {
                orphaned.push(old.snapshot_id.clone());
            }
        }

        let transport_image = role == ZoneRole::Target
            && !self.options.keep_versioned_in_targets
            && new_image.name != stable_name
            && new_image.image_id != alias_id;
        if transport_image && self.remove_image(zone, new_image, &mut outcome).await {
            orphaned.push(new_image.snapshot_id.clone());
        }

        if self.options.prune_snapshots && !orphaned.is_empty() {
            self.prune_snapshots(zone, orphaned, &mut outcome).await;
        }

        for warning in &outcome.warnings {
            tracing::warn!("{}", warning);
        }
        tracing::info!(
            "Zone {}: '{}' -> image {} ({} superseded image(s) removed)",
            zone,
            stable_name,
            outcome.stable_image.image_id,
            outcome.removed_images.len()
        );
        Ok(outcome)
    }

    async fn establish_alias(
        &self,
        zone: &ZoneId,
        stable_name: &str,
        new_image: &ZoneImage,
        existing: &[ZoneImage],
    ) -> Result<(ZoneImage, bool), ReconcileError> {
        // No suffix: the new image already carries the stable name
        if new_image.name == stable_name {
            return Ok((new_image.clone(), true));
        }

        let alias_err = |error: String| ReconcileError::Alias {
            zone: zone.clone(),
            name: stable_name.to_string(),
            error,
        };

        if let Some(current) = existing
            .iter()
            .find(|i| i.snapshot_id == new_image.snapshot_id && i.state != ImageState::Error)
        {
            tracing::info!(
                "Zone {}: image {} already aliases snapshot {}",
                zone,
                current.image_id,
                new_image.snapshot_id
            );
            // A previous run may have stopped before the alias was confirmed
            if current.state == ImageState::Available {
                return Ok((current.clone(), true));
            }
            let confirmed = confirm_image(
                self.cloud.as_ref(),
                zone,
                &current.image_id,
                self.polls.image,
            )
            .await
            .map_err(|e| alias_err(e.to_string()))?;
            return Ok((confirmed, true));
        }

        let request = ImageRequest {
            name: stable_name.to_string(),
            snapshot_id: new_image.snapshot_id.clone(),
            arch: new_image.arch.clone(),
            tags: image_tags(zone, &new_image.arch, version_token(stable_name)),
        };
        let alias = create_confirmed_image(self.cloud.as_ref(), zone, &request, self.polls.image)
            .await
            .map_err(|e| alias_err(e.to_string()))?;
        Ok((alias, false))
    }

    /// Delete one image; failures become warnings
    async fn remove_image(
        &self,
        zone: &ZoneId,
        image: &ZoneImage,
        outcome: &mut ReconcileOutcome,
    ) -> bool {
        match self.cloud.delete_image(zone, &image.image_id).await {
            Ok(()) => {
                tracing::debug!(
                    "Zone {}: deleted image {} ({})",
                    zone,
                    image.image_id,
                    image.name
                );
                outcome.removed_images.push(image.image_id.clone());
                true
            }
            Err(e) => {
                outcome.warnings.push(ReconciliationWarning {
                    zone: zone.clone(),
                    resource: format!("image {}", image.image_id),
                    message: format!("could not delete '{}': {e}", image.name),
                });
                false
            }
        }
    }

    async fn prune_snapshots(
        &self,
        zone: &ZoneId,
        candidates: Vec<String>,
        outcome: &mut ReconcileOutcome,
    ) {
        let images = match self.cloud.list_images(zone, None).await {
            Ok(images) => images,
            Err(e) => {
                outcome.warnings.push(ReconciliationWarning {
                    zone: zone.clone(),
                    resource: "snapshots".to_string(),
                    message: format!("skipped pruning, image listing failed: {e}"),
                });
                return;
            }
        };
        let referenced: HashSet<&str> = images.iter().map(|i| i.snapshot_id.as_str()).collect();

        let mut seen = HashSet::new();
        for snapshot_id in candidates {
            if snapshot_id.is_empty()
                || referenced.contains(snapshot_id.as_str())
                || !seen.insert(snapshot_id.clone())
            {
                continue;
            }
            match self.cloud.delete_snapshot(zone, &snapshot_id).await {
                Ok(()) => outcome.pruned_snapshots.push(snapshot_id),
                Err(e) => outcome.warnings.push(ReconciliationWarning {
                    zone: zone.clone(),
                    resource: format!("snapshot {snapshot_id}"),
                    message: format!("could not delete: {e}"),
                }),
            }
        }
    }
}
