//! Cross-zone distribution
//!
//! Snapshots cannot cross zones. The origin snapshot is exported once to an
//! object-storage relay, then every target zone imports the relay object as
//! a new snapshot and republishes it under the same versioned-unique name.
//! Zones are independent: they run concurrently on a bounded worker pool and
//! a failure in one never stops the others.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

use super::global_config::PollSettings;
use super::model::{
    ImageRequest, RelayObject, RelayStatus, Snapshot, SnapshotStatus, ZoneId, ZoneImage,
};
use super::naming::{relay_key, version_token, NamingStrategy};
use super::poll::{wait_for, Probe};
use super::publish::{create_confirmed_image, image_tags, wait_for_snapshot};
use crate::config::defaults;
use crate::error::{DistributionError, ImportError, RelayError, WaitError, ZoneFailure, ZoneStage};
use crate::infra::cloud::CloudProvider;

/// Origin snapshot parked in the relay, ready for import
#[derive(Debug, Clone)]
pub struct Relay {
    pub origin: ZoneImage,
    /// Source snapshot; its size is what targets import
    pub source: Snapshot,
    pub object: RelayObject,
    pub stable_name: String,
}

/// Run `task` for every zone with at most `workers` in flight
///
/// Results come back in the order of `zones`. A task that panics is reported
/// as a failure at `abort_stage`.
pub async fn fan_out<T, F, Fut>(
    zones: Vec<ZoneId>,
    workers: usize,
    abort_stage: ZoneStage,
    task: F,
) -> Vec<(ZoneId, Result<T, ZoneFailure>)>
where
    T: Send + 'static,
    F: Fn(ZoneId) -> Fut,
    Fut: Future<Output = Result<T, ZoneFailure>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));

    let handles: Vec<_> = zones
        .into_iter()
        .map(|zone| {
            let sem = semaphore.clone();
            let work = task(zone.clone());
            let handle = tokio::spawn(async move {
                let _permit = sem.acquire().await;
                work.await
            });
            (zone, handle)
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (zone, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(ZoneFailure::new(
                zone.clone(),
                abort_stage,
                format!("zone task aborted: {e}"),
            )),
        };
        results.push((zone, result));
    }
    results
}

/// Targets without the origin zone and without duplicates, order preserved
pub fn target_zones(origin: &ZoneId, zones: &[ZoneId]) -> Vec<ZoneId> {
    let mut targets: Vec<ZoneId> = Vec::with_capacity(zones.len());
    for zone in zones {
        if zone != origin && !targets.contains(zone) {
            targets.push(zone.clone());
        }
    }
    targets
}

/// Exports the origin image and replicates it into target zones
#[derive(Clone)]
pub struct Distributor {
    cloud: Arc<dyn CloudProvider>,
    naming: Arc<dyn NamingStrategy>,
    polls: PollSettings,
    workers: usize,
}

impl Distributor {
    pub fn new(
        cloud: Arc<dyn CloudProvider>,
        naming: Arc<dyn NamingStrategy>,
        polls: PollSettings,
    ) -> Self {
        Self {
            cloud,
            naming,
            polls,
            workers: defaults::DEFAULT_DISTRIBUTION_WORKERS,
        }
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Stable name of a versioned-unique name
    ///
    /// A name without a build suffix is used verbatim, with a warning.
    pub fn stable_name(&self, versioned_name: &str) -> String {
        let stable = self.naming.stable_name(versioned_name);
        if stable == versioned_name {
            tracing::warn!(
                "Image name '{}' has no build timestamp suffix; using it as the stable name",
                versioned_name
            );
        }
        stable
    }

    /// Export the origin snapshot and wait until the relay object is available
    ///
    /// `stable_name` is the name already resolved with [`Distributor::stable_name`].
    pub async fn prepare(
        &self,
        origin: &ZoneImage,
        stable_name: &str,
        bucket: &str,
    ) -> Result<Relay, RelayError> {
        let zone = &origin.zone;
        let key = relay_key(&origin.name);

        let source_err = |error: String| RelayError::Source {
            zone: zone.clone(),
            snapshot: origin.snapshot_id.clone(),
            error,
        };
        let export_err = |error: String| RelayError::Export {
            zone: zone.clone(),
            snapshot: origin.snapshot_id.clone(),
            bucket: bucket.to_string(),
            key: key.clone(),
            error,
        };

        let mut source = self
            .cloud
            .get_snapshot(zone, &origin.snapshot_id)
            .await
            .map_err(|e| source_err(e.to_string()))?;
        if source.status != SnapshotStatus::Available {
            source =
                wait_for_snapshot(self.cloud.as_ref(), zone, &source.id, self.polls.snapshot)
                    .await
                    .map_err(|e| source_err(e.to_string()))?;
        }

        tracing::info!(
            "Exporting snapshot {} ({} bytes) from {} to s3://{}/{}",
            source.id,
            source.size_bytes,
            zone,
            bucket,
            key
        );
        let object = self
            .cloud
            .export_snapshot(zone, &source.id, bucket, &key)
            .await
            .map_err(|e| export_err(e.to_string()))?;

        let what = format!("relay object s3://{bucket}/{key}");
        let cloud = self.cloud.as_ref();
        let (probe_source, probe_object) = (&source, &object);
        let waited = wait_for(&what, self.polls.export, move || async move {
            Ok(match cloud.export_status(probe_source, probe_object).await? {
                RelayStatus::Available => Probe::Ready(()),
                RelayStatus::Pending => Probe::Pending,
                RelayStatus::Failed(reason) => Probe::Failed(reason),
            })
        })
        .await;

        match waited {
            Ok(()) => {}
            Err(WaitError::TimedOut { elapsed, .. }) => {
                return Err(RelayError::Timeout {
                    bucket: bucket.to_string(),
                    key: key.clone(),
                    elapsed,
                })
            }
            Err(e) => return Err(export_err(e.to_string())),
        }

        tracing::info!("Relay object s3://{}/{} is available", bucket, key);
        Ok(Relay {
            origin: origin.clone(),
            source,
            object,
            stable_name: stable_name.to_string(),
        })
    }

    /// Import the relay object into `zone` and publish it under the origin's name
    pub async fn replicate(
        &self,
        relay: &Relay,
        zone: &ZoneId,
    ) -> Result<ZoneImage, ImportError> {
        let object = &relay.object;
        let name = &relay.origin.name;
        let snapshot_err = |error: String| ImportError::Snapshot {
            zone: zone.clone(),
            bucket: object.bucket.clone(),
            key: object.key.clone(),
            error,
        };

        // Size comes from the source snapshot; the relay object may be
        // compressed and smaller.
        tracing::info!(
            "Importing s3://{}/{} into {} ({} bytes)",
            object.bucket,
            object.key,
            zone,
            relay.source.size_bytes
        );
        let imported = self
            .cloud
            .import_snapshot(zone, object, name, relay.source.size_bytes)
            .await
            .map_err(|e| snapshot_err(e.to_string()))?;

        let snapshot =
            wait_for_snapshot(self.cloud.as_ref(), zone, &imported.id, self.polls.import)
                .await
                .map_err(|e| match e {
                    WaitError::TimedOut { elapsed, .. } => ImportError::Timeout {
                        zone: zone.clone(),
                        snapshot: imported.id.clone(),
                        elapsed,
                    },
                    other => snapshot_err(other.to_string()),
                })?;

        let arch = if relay.origin.arch.is_empty() {
            defaults::DEFAULT_ARCHITECTURE.to_string()
        } else {
            relay.origin.arch.clone()
        };
        let request = ImageRequest {
            name: name.clone(),
            snapshot_id: snapshot.id.clone(),
            tags: image_tags(zone, &arch, version_token(&relay.stable_name)),
            arch,
        };
        let image = create_confirmed_image(self.cloud.as_ref(), zone, &request, self.polls.image)
            .await
            .map_err(|e| ImportError::Image {
                zone: zone.clone(),
                name: name.clone(),
                error: e.to_string(),
            })?;

        tracing::info!(
            "Replicated {} into {} as image {} (snapshot {})",
            name,
            zone,
            image.image_id,
            snapshot.id
        );
        Ok(image)
    }

    /// Export once and replicate into every target zone
    ///
    /// The origin zone is dropped from `targets`. Zone failures are collected
    /// and returned together once every zone has finished.
    pub async fn distribute(
        &self,
        origin: &ZoneImage,
        targets: &[ZoneId],
        bucket: &str,
    ) -> Result<Vec<ZoneImage>, DistributionError> {
        let targets = target_zones(&origin.zone, targets);
        let stable_name = self.stable_name(&origin.name);
        let relay = Arc::new(self.prepare(origin, &stable_name, bucket).await?);

        let results = fan_out(targets, self.workers, ZoneStage::Import, |zone| {
            let this = self.clone();
            let relay = relay.clone();
            async move {
                this.replicate(&relay, &zone)
                    .await
                    .map_err(|e| ZoneFailure::new(zone.clone(), ZoneStage::Import, e))
            }
        })
        .await;

        let mut images = Vec::new();
        let mut failures = Vec::new();
        for (_, result) in results {
            match result {
                Ok(image) => images.push(image),
                Err(failure) => {
                    tracing::error!("{}", failure);
                    failures.push(failure);
                }
            }
        }

        if failures.is_empty() {
            Ok(images)
        } else {
            Err(DistributionError::Zones { failures })
        }
    }
}
