//! In-memory cloud provider
//!
//! Satisfies [`CloudProvider`] without any network access. Asynchronous
//! provider operations are simulated: snapshots, exports and images start out
//! pending and become available on the next status read. Failures can be
//! injected per zone, and every image mutation is recorded in a census so
//! tests can observe how many images carried a name at each step.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use super::cloud::{CloudProvider, CloudResult};
use crate::core::model::{
    ImageRequest, ImageState, RelayObject, RelayStatus, Snapshot, SnapshotStatus, ZoneId,
    ZoneImage,
};
use crate::error::CloudError;

/// Count of images with one name in one zone, taken after a mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CensusEntry {
    pub zone: ZoneId,
    pub name: String,
    pub count: usize,
}

#[derive(Debug)]
struct RelayEntry {
    object: RelayObject,
    source_zone: ZoneId,
    source_snapshot: String,
    ready: bool,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    snapshots: BTreeMap<(ZoneId, String), Snapshot>,
    images: BTreeMap<(ZoneId, String), ZoneImage>,
    relays: HashMap<(String, String), RelayEntry>,
    census: Vec<CensusEntry>,
    fail_export: HashSet<ZoneId>,
    fail_import: HashSet<ZoneId>,
    fail_image_create: HashSet<(ZoneId, String)>,
    fail_image_ready: HashSet<(ZoneId, String)>,
    fail_image_delete: bool,
}

impl State {
    fn next_id(&mut self, kind: &str) -> String {
        self.next_id += 1;
        format!("{kind}-{:06}", self.next_id)
    }

    fn count_named(&self, zone: &ZoneId, name: &str) -> usize {
        self.images
            .values()
            .filter(|i| &i.zone == zone && i.name == name)
            .count()
    }

    fn record_census(&mut self, zone: &ZoneId, name: &str) {
        let count = self.count_named(zone, name);
        self.census.push(CensusEntry {
            zone: zone.clone(),
            name: name.to_string(),
            count,
        });
    }

    fn snapshot_mut(&mut self, zone: &ZoneId, id: &str) -> CloudResult<&mut Snapshot> {
        self.snapshots
            .get_mut(&(zone.clone(), id.to_string()))
            .ok_or_else(|| CloudError::NotFound {
                resource: format!("snapshot {id} in {zone}"),
            })
    }
}

/// Process-local [`CloudProvider`] for tests and rehearsals
#[derive(Debug, Default)]
pub struct MemoryCloud {
    state: Mutex<State>,
}

/// Relay objects are stored compressed, so their byte size differs from the
/// snapshot they carry.
fn relay_size(snapshot_size: u64) -> u64 {
    snapshot_size / 3 + 512
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an available snapshot and an available image wrapping it
    pub fn seed_image(&self, zone: &ZoneId, name: &str, size_bytes: u64) -> ZoneImage {
        let mut state = self.state.lock().unwrap();
        let snapshot_id = state.next_id("snap");
        state.snapshots.insert(
            (zone.clone(), snapshot_id.clone()),
            Snapshot {
                id: snapshot_id.clone(),
                zone: zone.clone(),
                size_bytes,
                status: SnapshotStatus::Available,
            },
        );
        let image_id = state.next_id("img");
        let image = ZoneImage {
            zone: zone.clone(),
            image_id: image_id.clone(),
            name: name.to_string(),
            snapshot_id,
            created_at: Utc::now(),
            arch: "x86_64".to_string(),
            state: ImageState::Available,
        };
        state.images.insert((zone.clone(), image_id), image.clone());
        image
    }

    /// Add an available volume snapshot source; returns the volume id
    ///
    /// Volumes are modelled as snapshots that are already available, which is
    /// enough for [`CloudProvider::create_snapshot`] to size new snapshots.
    pub fn seed_volume(&self, zone: &ZoneId, size_bytes: u64) -> String {
        let mut state = self.state.lock().unwrap();
        let volume_id = state.next_id("vol");
        state.snapshots.insert(
            (zone.clone(), volume_id.clone()),
            Snapshot {
                id: volume_id.clone(),
                zone: zone.clone(),
                size_bytes,
                status: SnapshotStatus::Available,
            },
        );
        volume_id
    }

    /// Make every export from `zone` fail
    pub fn fail_export_in(&self, zone: &ZoneId) {
        self.state.lock().unwrap().fail_export.insert(zone.clone());
    }

    /// Make every import into `zone` fail
    pub fn fail_import_in(&self, zone: &ZoneId) {
        self.state.lock().unwrap().fail_import.insert(zone.clone());
    }

    /// Make creation of images named `name` in `zone` fail
    pub fn fail_image_create(&self, zone: &ZoneId, name: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_image_create
            .insert((zone.clone(), name.to_string()));
    }

    /// Make images named `name` in `zone` end in the error state instead of
    /// becoming available
    pub fn fail_image_ready(&self, zone: &ZoneId, name: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_image_ready
            .insert((zone.clone(), name.to_string()));
    }

    /// Make every image deletion fail
    pub fn fail_image_deletes(&self) {
        self.state.lock().unwrap().fail_image_delete = true;
    }

    /// All images in `zone`, in creation order
    pub fn images(&self, zone: &ZoneId) -> Vec<ZoneImage> {
        let state = self.state.lock().unwrap();
        state
            .images
            .values()
            .filter(|i| &i.zone == zone)
            .cloned()
            .collect()
    }

    /// Images in `zone` named exactly `name`
    pub fn images_named(&self, zone: &ZoneId, name: &str) -> Vec<ZoneImage> {
        self.images(zone)
            .into_iter()
            .filter(|i| i.name == name)
            .collect()
    }

    /// All snapshots in `zone`
    pub fn snapshots(&self, zone: &ZoneId) -> Vec<Snapshot> {
        let state = self.state.lock().unwrap();
        state
            .snapshots
            .values()
            .filter(|s| &s.zone == zone && !s.id.starts_with("vol-"))
            .cloned()
            .collect()
    }

    /// Relay objects written so far
    pub fn relay_objects(&self) -> Vec<RelayObject> {
        let state = self.state.lock().unwrap();
        state.relays.values().map(|r| r.object.clone()).collect()
    }

    /// Image counts for `name` in `zone` after each mutation touching that name
    pub fn census(&self, zone: &ZoneId, name: &str) -> Vec<usize> {
        let state = self.state.lock().unwrap();
        state
            .census
            .iter()
            .filter(|e| &e.zone == zone && e.name == name)
            .map(|e| e.count)
            .collect()
    }
}

#[async_trait]
impl CloudProvider for MemoryCloud {
    async fn create_snapshot(
        &self,
        zone: &ZoneId,
        volume_id: &str,
        _name: &str,
    ) -> CloudResult<Snapshot> {
        let mut state = self.state.lock().unwrap();
        let size_bytes = state
            .snapshots
            .get(&(zone.clone(), volume_id.to_string()))
            .map(|v| v.size_bytes)
            .ok_or_else(|| CloudError::NotFound {
                resource: format!("volume {volume_id} in {zone}"),
            })?;
        let id = state.next_id("snap");
        let snapshot = Snapshot {
            id: id.clone(),
            zone: zone.clone(),
            size_bytes,
            status: SnapshotStatus::Pending,
        };
        state.snapshots.insert((zone.clone(), id), snapshot.clone());
        Ok(snapshot)
    }

    async fn get_snapshot(&self, zone: &ZoneId, snapshot_id: &str) -> CloudResult<Snapshot> {
        let mut state = self.state.lock().unwrap();
        let snapshot = state.snapshot_mut(zone, snapshot_id)?;
        let current = snapshot.clone();
        if snapshot.status == SnapshotStatus::Pending {
            snapshot.status = SnapshotStatus::Available;
        }
        Ok(current)
    }

    async fn delete_snapshot(&self, zone: &ZoneId, snapshot_id: &str) -> CloudResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .snapshots
            .remove(&(zone.clone(), snapshot_id.to_string()))
            .map(|_| ())
            .ok_or_else(|| CloudError::NotFound {
                resource: format!("snapshot {snapshot_id} in {zone}"),
            })
    }

    async fn export_snapshot(
        &self,
        zone: &ZoneId,
        snapshot_id: &str,
        bucket: &str,
        key: &str,
    ) -> CloudResult<RelayObject> {
        let mut state = self.state.lock().unwrap();
        if state.fail_export.contains(zone) {
            return Err(CloudError::Rejected {
                operation: format!("export of snapshot {snapshot_id}"),
                reason: "injected export failure".to_string(),
            });
        }
        let size_bytes = relay_size(state.snapshot_mut(zone, snapshot_id)?.size_bytes);
        let object = RelayObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size_bytes,
            task_id: None,
        };
        // Re-exporting the same key overwrites the previous object
        state.relays.insert(
            (bucket.to_string(), key.to_string()),
            RelayEntry {
                object: object.clone(),
                source_zone: zone.clone(),
                source_snapshot: snapshot_id.to_string(),
                ready: false,
            },
        );
        Ok(object)
    }

    async fn export_status(
        &self,
        source: &Snapshot,
        relay: &RelayObject,
    ) -> CloudResult<RelayStatus> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .relays
            .get_mut(&(relay.bucket.clone(), relay.key.clone()))
            .ok_or_else(|| CloudError::NotFound {
                resource: format!("relay object s3://{}/{}", relay.bucket, relay.key),
            })?;
        if entry.source_zone != source.zone || entry.source_snapshot != source.id {
            return Ok(RelayStatus::Failed(format!(
                "relay object was overwritten by snapshot {}",
                entry.source_snapshot
            )));
        }
        if entry.ready {
            Ok(RelayStatus::Available)
        } else {
            entry.ready = true;
            Ok(RelayStatus::Pending)
        }
    }

    async fn import_snapshot(
        &self,
        zone: &ZoneId,
        relay: &RelayObject,
        _name: &str,
        size_bytes: u64,
    ) -> CloudResult<Snapshot> {
        let mut state = self.state.lock().unwrap();
        if state.fail_import.contains(zone) {
            return Err(CloudError::Rejected {
                operation: format!("import of s3://{}/{}", relay.bucket, relay.key),
                reason: "injected import failure".to_string(),
            });
        }
        let ready = state
            .relays
            .get(&(relay.bucket.clone(), relay.key.clone()))
            .is_some_and(|r| r.ready);
        if !ready {
            return Err(CloudError::NotFound {
                resource: format!("relay object s3://{}/{}", relay.bucket, relay.key),
            });
        }
        let id = state.next_id("snap");
        let snapshot = Snapshot {
            id: id.clone(),
            zone: zone.clone(),
            size_bytes,
            status: SnapshotStatus::Pending,
        };
        state.snapshots.insert((zone.clone(), id), snapshot.clone());
        Ok(snapshot)
    }

    async fn create_image(&self, zone: &ZoneId, request: &ImageRequest) -> CloudResult<ZoneImage> {
        let mut state = self.state.lock().unwrap();
        let operation = format!("creation of image {}", request.name);
        if state
            .fail_image_create
            .contains(&(zone.clone(), request.name.clone()))
        {
            return Err(CloudError::Rejected {
                operation,
                reason: "injected image failure".to_string(),
            });
        }
        let status = state.snapshot_mut(zone, &request.snapshot_id)?.status;
        if status != SnapshotStatus::Available {
            return Err(CloudError::Rejected {
                operation,
                reason: format!("snapshot {} is not available", request.snapshot_id),
            });
        }
        let image_id = state.next_id("img");
        let image = ZoneImage {
            zone: zone.clone(),
            image_id: image_id.clone(),
            name: request.name.clone(),
            snapshot_id: request.snapshot_id.clone(),
            created_at: Utc::now(),
            arch: request.arch.clone(),
            state: ImageState::Creating,
        };
        state.images.insert((zone.clone(), image_id), image.clone());
        state.record_census(zone, &request.name);
        Ok(image)
    }

    async fn get_image(&self, zone: &ZoneId, image_id: &str) -> CloudResult<Option<ZoneImage>> {
        let mut state = self.state.lock().unwrap();
        let State {
            images,
            fail_image_ready,
            ..
        } = &mut *state;
        let Some(image) = images.get_mut(&(zone.clone(), image_id.to_string())) else {
            return Ok(None);
        };
        let current = image.clone();
        if image.state == ImageState::Creating {
            image.state = if fail_image_ready.contains(&(zone.clone(), image.name.clone())) {
                ImageState::Error
            } else {
                ImageState::Available
            };
        }
        Ok(Some(current))
    }

    async fn list_images(
        &self,
        zone: &ZoneId,
        name_filter: Option<&str>,
    ) -> CloudResult<Vec<ZoneImage>> {
        // Substring match, like the real API's name filter
        Ok(self
            .images(zone)
            .into_iter()
            .filter(|i| name_filter.map_or(true, |f| i.name.contains(f)))
            .collect())
    }

    async fn delete_image(&self, zone: &ZoneId, image_id: &str) -> CloudResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_image_delete {
            return Err(CloudError::Rejected {
                operation: format!("deletion of image {image_id}"),
                reason: "injected delete failure".to_string(),
            });
        }
        let image = state
            .images
            .remove(&(zone.clone(), image_id.to_string()))
            .ok_or_else(|| CloudError::NotFound {
                resource: format!("image {image_id} in {zone}"),
            })?;
        state.record_census(zone, &image.name);
        Ok(())
    }
}
