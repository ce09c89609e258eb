//! Snapshot publication in the origin zone
//!
//! Snapshot the written volume, wait for it, and register a versioned-unique
//! image on top of it. Also home to the waits shared by every stage that
//! creates snapshots or images.

use super::global_config::PollSettings;
use super::model::{ImageRequest, ImageState, Snapshot, SnapshotStatus, ZoneId, ZoneImage};
use super::poll::{wait_for, PollPolicy, Probe};
use crate::error::{PublishError, WaitError};
use crate::infra::cloud::CloudProvider;

/// Inputs for publishing one build
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub zone: ZoneId,
    /// Volume the build stage wrote
    pub volume_id: String,
    /// Versioned-unique image name
    pub name: String,
    pub version: String,
    pub arch: String,
}

/// Tags attached to every published image
pub fn image_tags(zone: &ZoneId, arch: &str, version: &str) -> Vec<String> {
    vec![
        format!("zone={zone}"),
        format!("arch={arch}"),
        format!("version={version}"),
    ]
}

/// Wait until a snapshot is available
pub async fn wait_for_snapshot(
    cloud: &dyn CloudProvider,
    zone: &ZoneId,
    snapshot_id: &str,
    policy: PollPolicy,
) -> Result<Snapshot, WaitError> {
    let what = format!("snapshot {snapshot_id} in {zone}");
    wait_for(&what, policy, move || async move {
        let snapshot = cloud.get_snapshot(zone, snapshot_id).await?;
        Ok(match snapshot.status {
            SnapshotStatus::Available => Probe::Ready(snapshot),
            SnapshotStatus::Pending => Probe::Pending,
            SnapshotStatus::Error => Probe::Failed("snapshot entered error state".to_string()),
        })
    })
    .await
}

/// Wait until an image exists and is available
pub async fn confirm_image(
    cloud: &dyn CloudProvider,
    zone: &ZoneId,
    image_id: &str,
    policy: PollPolicy,
) -> Result<ZoneImage, WaitError> {
    let what = format!("image {image_id} in {zone}");
    wait_for(&what, policy, move || async move {
        Ok(match cloud.get_image(zone, image_id).await? {
            Some(image) if image.state == ImageState::Available => Probe::Ready(image),
            Some(image) if image.state == ImageState::Error => {
                Probe::Failed("image entered error state".to_string())
            }
            _ => Probe::Pending,
        })
    })
    .await
}

/// Register an image and wait until it is confirmed present
pub async fn create_confirmed_image(
    cloud: &dyn CloudProvider,
    zone: &ZoneId,
    request: &ImageRequest,
    policy: PollPolicy,
) -> Result<ZoneImage, WaitError> {
    let created = cloud.create_image(zone, request).await?;
    tracing::debug!(
        "Created image {} ({}) in {}",
        created.name,
        created.image_id,
        zone
    );
    confirm_image(cloud, zone, &created.image_id, policy).await
}

/// Converts a written volume into a named image in its zone
pub struct SnapshotPublisher<'a> {
    cloud: &'a dyn CloudProvider,
    polls: PollSettings,
}

impl<'a> SnapshotPublisher<'a> {
    pub fn new(cloud: &'a dyn CloudProvider, polls: PollSettings) -> Self {
        Self { cloud, polls }
    }

    /// Snapshot the volume and publish it under the versioned-unique name
    ///
    /// Not deduplicated: publishing the same name twice yields two images.
    pub async fn publish(&self, request: &PublishRequest) -> Result<ZoneImage, PublishError> {
        let zone = &request.zone;
        let snapshot_err = |error: String| PublishError::Snapshot {
            zone: zone.clone(),
            volume: request.volume_id.clone(),
            error,
        };

        tracing::info!(
            "Snapshotting volume {} in {} as {}",
            request.volume_id,
            zone,
            request.name
        );
        let snapshot = self
            .cloud
            .create_snapshot(zone, &request.volume_id, &request.name)
            .await
            .map_err(|e| snapshot_err(e.to_string()))?;
        let snapshot = wait_for_snapshot(self.cloud, zone, &snapshot.id, self.polls.snapshot)
            .await
            .map_err(|e| snapshot_err(e.to_string()))?;

        let image_request = ImageRequest {
            name: request.name.clone(),
            snapshot_id: snapshot.id.clone(),
            arch: request.arch.clone(),
            tags: image_tags(zone, &request.arch, &request.version),
        };
        let image = create_confirmed_image(self.cloud, zone, &image_request, self.polls.image)
            .await
            .map_err(|e| PublishError::Image {
                zone: zone.clone(),
                name: request.name.clone(),
                error: e.to_string(),
            })?;

        tracing::info!(
            "Published image {} ({}) from snapshot {} in {}",
            image.name,
            image.image_id,
            snapshot.id,
            zone
        );
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::memory::MemoryCloud;

    fn request(cloud: &MemoryCloud, zone: &ZoneId) -> PublishRequest {
        PublishRequest {
            zone: zone.clone(),
            volume_id: cloud.seed_volume(zone, 10_737_418_240),
            name: "talos-scaleway-v1.11.5-20251115220248".to_string(),
            version: "v1.11.5".to_string(),
            arch: "x86_64".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_creates_available_image() {
        let cloud = MemoryCloud::new();
        let zone = ZoneId::new("fr-par-1");
        let request = request(&cloud, &zone);

        let publisher =
            SnapshotPublisher::new(&cloud, PollSettings::uniform(PollPolicy::immediate()));
        let image = publisher.publish(&request).await.unwrap();

        assert_eq!(image.name, request.name);
        assert_eq!(image.state, ImageState::Available);
        assert_eq!(image.zone, zone);

        let snapshots = cloud.snapshots(&zone);
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].id, image.snapshot_id);
        assert_eq!(snapshots[0].size_bytes, 10_737_418_240);
    }

    #[tokio::test]
    async fn test_publish_unknown_volume() {
        let cloud = MemoryCloud::new();
        let zone = ZoneId::new("fr-par-1");
        let mut request = request(&cloud, &zone);
        request.volume_id = "vol-missing".to_string();

        let publisher =
            SnapshotPublisher::new(&cloud, PollSettings::uniform(PollPolicy::immediate()));
        let err = publisher.publish(&request).await.unwrap_err();

        assert!(matches!(err, PublishError::Snapshot { .. }));
        let message = err.to_string();
        assert!(message.contains("fr-par-1"));
        assert!(message.contains("vol-missing"));
    }

    #[tokio::test]
    async fn test_publish_image_failure_names_image() {
        let cloud = MemoryCloud::new();
        let zone = ZoneId::new("fr-par-1");
        let request = request(&cloud, &zone);
        cloud.fail_image_create(&zone, &request.name);

        let publisher =
            SnapshotPublisher::new(&cloud, PollSettings::uniform(PollPolicy::immediate()));
        let err = publisher.publish(&request).await.unwrap_err();

        assert!(matches!(err, PublishError::Image { ref name, .. } if name == &request.name));
    }

    #[test]
    fn test_image_tags() {
        assert_eq!(
            image_tags(&ZoneId::new("nl-ams-1"), "x86_64", "v1.11.5"),
            vec!["zone=nl-ams-1", "arch=x86_64", "version=v1.11.5"]
        );
    }
}
