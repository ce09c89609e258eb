//! Distribution run orchestration
//!
//! Locates the origin image from the build manifest, exports it once, then
//! drives every zone through replicate → reconcile (target zones) or
//! reconcile only (origin zone). Each zone's sequence is ordered; zones run
//! concurrently and fail independently.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use super::distribute::{fan_out, target_zones, Distributor, Relay};
use super::manifest::{BuildManifest, OriginRef};
use super::model::{ZoneId, ZoneImage};
use super::naming::relay_key;
use super::reconcile::{AliasReconciler, ReconcileOutcome, ZoneRole};
use crate::error::{DistributionError, ImgrelayError, ImportError, ZoneFailure, ZoneStage};
use crate::infra::cloud::CloudProvider;

/// Dry-run view of a distribution run
#[derive(Debug, Clone, Serialize)]
pub struct RunPlan {
    pub origin: ZoneImage,
    pub stable_name: String,
    pub bucket: String,
    pub relay_key: String,
    pub targets: Vec<ZoneId>,
    /// Images currently carrying the stable name, per zone
    pub current_aliases: Vec<ZoneAliases>,
}

/// Existing stable-named images in one zone
#[derive(Debug, Clone, Serialize)]
pub struct ZoneAliases {
    pub zone: ZoneId,
    pub image_ids: Vec<String>,
}

/// Outcome of a distribution run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub origin: ZoneImage,
    pub stable_name: String,
    pub succeeded: Vec<ReconcileOutcome>,
    pub failed: Vec<ZoneFailure>,
}

impl RunSummary {
    /// Every zone ended with a confirmed stable image
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Aggregate error for the failed zones, if any
    pub fn error(&self) -> Option<DistributionError> {
        if self.failed.is_empty() {
            None
        } else {
            Some(DistributionError::Zones {
                failures: self.failed.clone(),
            })
        }
    }
}

fn import_stage(error: &ImportError) -> ZoneStage {
    match error {
        ImportError::Image { .. } => ZoneStage::Publish,
        ImportError::Snapshot { .. } | ImportError::Timeout { .. } => ZoneStage::Import,
    }
}

/// Runs distribution and reconciliation for a published build
#[derive(Clone)]
pub struct Pipeline {
    cloud: Arc<dyn CloudProvider>,
    distributor: Distributor,
    reconciler: AliasReconciler,
}

impl Pipeline {
    pub fn new(
        cloud: Arc<dyn CloudProvider>,
        distributor: Distributor,
        reconciler: AliasReconciler,
    ) -> Self {
        Self {
            cloud,
            distributor,
            reconciler,
        }
    }

    /// Look up the image a build left behind
    pub async fn resolve_origin(&self, origin: &OriginRef) -> Result<ZoneImage, DistributionError> {
        let origin_err = |error: String| DistributionError::Origin {
            zone: origin.zone.clone(),
            image: origin.image_id.clone(),
            error,
        };
        match self.cloud.get_image(&origin.zone, &origin.image_id).await {
            Ok(Some(image)) => Ok(image),
            Ok(None) => Err(origin_err("image does not exist".to_string())),
            Err(e) => Err(origin_err(e.to_string())),
        }
    }

    /// Origin image named by the manifest at `manifest_path`
    pub async fn origin_from_manifest(
        &self,
        manifest_path: &Path,
    ) -> Result<ZoneImage, ImgrelayError> {
        let manifest = BuildManifest::load(manifest_path)?;
        let origin = manifest.origin(manifest_path)?;
        tracing::info!("Origin from manifest: {}", origin.artifact_id());
        Ok(self.resolve_origin(&origin).await?)
    }

    /// Describe what [`Pipeline::run`] would do, without mutating anything
    pub async fn plan(&self, origin: ZoneImage, bucket: &str, zones: &[ZoneId]) -> RunPlan {
        let stable_name = self.distributor.stable_name(&origin.name);
        let targets = target_zones(&origin.zone, zones);

        let mut current_aliases = Vec::new();
        for zone in std::iter::once(&origin.zone).chain(targets.iter()) {
            let image_ids = match self.cloud.list_images(zone, Some(&stable_name)).await {
                Ok(images) => images
                    .into_iter()
                    .filter(|i| i.name == stable_name)
                    .map(|i| i.image_id)
                    .collect(),
                Err(e) => {
                    tracing::warn!("Zone {}: cannot list images: {}", zone, e);
                    Vec::new()
                }
            };
            current_aliases.push(ZoneAliases {
                zone: zone.clone(),
                image_ids,
            });
        }

        RunPlan {
            relay_key: relay_key(&origin.name),
            bucket: bucket.to_string(),
            stable_name,
            targets,
            current_aliases,
            origin,
        }
    }

    /// Distribute `origin` to `zones` and reconcile the stable alias everywhere
    ///
    /// Zone failures are reported in the summary, not as an error. A relay
    /// failure fails every target zone but still reconciles the origin.
    pub async fn run(&self, origin: ZoneImage, bucket: &str, zones: &[ZoneId]) -> RunSummary {
        let stable_name = self.distributor.stable_name(&origin.name);
        let targets = target_zones(&origin.zone, zones);

        let relay: Result<Arc<Relay>, String> = if targets.is_empty() {
            Err("no target zones".to_string())
        } else {
            self.distributor
                .prepare(&origin, &stable_name, bucket)
                .await
                .map(Arc::new)
                .map_err(|e| {
                    tracing::error!("{}", e);
                    e.to_string()
                })
        };

        let mut all_zones = vec![origin.zone.clone()];
        all_zones.extend(targets);

        let origin = Arc::new(origin);
        let stable = Arc::new(stable_name.clone());
        let results = fan_out(all_zones, self.distributor.workers(), ZoneStage::Import, |zone| {
            let this = self.clone();
            let origin = origin.clone();
            let stable = stable.clone();
            let relay = relay.clone();
            async move {
                if zone == origin.zone {
                    return this
                        .reconciler
                        .reconcile(&zone, &stable, &origin, ZoneRole::Origin)
                        .await
                        .map_err(|e| ZoneFailure::new(zone.clone(), ZoneStage::Reconcile, e));
                }

                let relay =
                    relay.map_err(|e| ZoneFailure::new(zone.clone(), ZoneStage::Import, e))?;
                let image = this
                    .distributor
                    .replicate(&relay, &zone)
                    .await
                    .map_err(|e| ZoneFailure::new(zone.clone(), import_stage(&e), e))?;
                this.reconciler
                    .reconcile(&zone, &stable, &image, ZoneRole::Target)
                    .await
                    .map_err(|e| ZoneFailure::new(zone.clone(), ZoneStage::Reconcile, e))
            }
        })
        .await;

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        for (_, result) in results {
            match result {
                Ok(outcome) => succeeded.push(outcome),
                Err(failure) => {
                    tracing::error!("{}", failure);
                    failed.push(failure);
                }
            }
        }

        RunSummary {
            origin: Arc::try_unwrap(origin).unwrap_or_else(|shared| (*shared).clone()),
            stable_name,
            succeeded,
            failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::global_config::PollSettings;
    use crate::core::naming::TimestampSuffix;
    use crate::core::poll::PollPolicy;
    use crate::core::reconcile::ReconcileOptions;
    use crate::infra::memory::MemoryCloud;

    fn pipeline(cloud: Arc<MemoryCloud>) -> Pipeline {
        let polls = PollSettings::uniform(PollPolicy::immediate());
        Pipeline::new(
            cloud.clone(),
            Distributor::new(cloud.clone(), Arc::new(TimestampSuffix), polls),
            AliasReconciler::new(cloud, polls, ReconcileOptions::default()),
        )
    }

    #[test]
    fn test_import_stage() {
        let zone = ZoneId::new("fr-par-2");
        assert_eq!(
            import_stage(&ImportError::Image {
                zone: zone.clone(),
                name: "n".to_string(),
                error: "e".to_string(),
            }),
            ZoneStage::Publish
        );
        assert_eq!(
            import_stage(&ImportError::Snapshot {
                zone,
                bucket: "b".to_string(),
                key: "k".to_string(),
                error: "e".to_string(),
            }),
            ZoneStage::Import
        );
    }

    #[tokio::test]
    async fn test_missing_origin_image() {
        let cloud = Arc::new(MemoryCloud::new());
        let origin = OriginRef::parse("fr-par-1:img-gone").unwrap();

        let err = pipeline(cloud).resolve_origin(&origin).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("fr-par-1"));
        assert!(message.contains("img-gone"));
    }

    #[tokio::test]
    async fn test_plan_does_not_mutate() {
        let cloud = Arc::new(MemoryCloud::new());
        let a = ZoneId::new("fr-par-1");
        let b = ZoneId::new("nl-ams-1");
        let old = cloud.seed_image(&b, "talos-scaleway-v1.11.5", 100);
        let origin = cloud.seed_image(&a, "talos-scaleway-v1.11.5-20251115220248", 100);

        let plan = pipeline(cloud.clone())
            .plan(origin, "bucket", &[a.clone(), b.clone()])
            .await;

        assert_eq!(plan.stable_name, "talos-scaleway-v1.11.5");
        assert_eq!(
            plan.relay_key,
            "talos-scaleway-v1.11.5-20251115220248.qcow2"
        );
        assert_eq!(plan.targets, vec![b.clone()]);
        assert!(plan.current_aliases[0].image_ids.is_empty());
        assert_eq!(plan.current_aliases[1].image_ids, vec![old.image_id]);
        assert!(cloud.relay_objects().is_empty());
        assert_eq!(cloud.images(&a).len(), 1);
        assert_eq!(cloud.images(&b).len(), 1);
    }

    #[tokio::test]
    async fn test_relay_failure_still_reconciles_origin() {
        let cloud = Arc::new(MemoryCloud::new());
        let a = ZoneId::new("fr-par-1");
        let b = ZoneId::new("nl-ams-1");
        let origin = cloud.seed_image(&a, "talos-scaleway-v1.11.5-20251115220248", 100);
        cloud.fail_export_in(&a);

        let summary = pipeline(cloud.clone()).run(origin, "bucket", &[b.clone()]).await;

        assert!(!summary.is_success());
        assert_eq!(summary.succeeded.len(), 1);
        assert_eq!(summary.succeeded[0].zone, a);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].zone, b);
        assert_eq!(summary.failed[0].stage, ZoneStage::Import);
        assert!(matches!(
            summary.error(),
            Some(DistributionError::Zones { failures }) if failures.len() == 1
        ));
    }
}
