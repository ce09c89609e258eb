//! Cloud capability interface
//!
//! Everything the pipeline needs from a provider: zone-local snapshots,
//! export to and import from the object-storage relay, and image
//! registration. Implementations must be usable concurrently from several
//! zone workers.

use async_trait::async_trait;

use crate::core::model::{ImageRequest, RelayObject, RelayStatus, Snapshot, ZoneId, ZoneImage};
use crate::error::CloudError;

/// Result type for provider calls
pub type CloudResult<T> = Result<T, CloudError>;

/// Snapshot, relay and image operations of a cloud provider
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Snapshot a volume in `zone`; the snapshot starts out pending
    async fn create_snapshot(
        &self,
        zone: &ZoneId,
        volume_id: &str,
        name: &str,
    ) -> CloudResult<Snapshot>;

    /// Current state of a snapshot
    async fn get_snapshot(&self, zone: &ZoneId, snapshot_id: &str) -> CloudResult<Snapshot>;

    async fn delete_snapshot(&self, zone: &ZoneId, snapshot_id: &str) -> CloudResult<()>;

    /// Start exporting a snapshot to `bucket/key`
    async fn export_snapshot(
        &self,
        zone: &ZoneId,
        snapshot_id: &str,
        bucket: &str,
        key: &str,
    ) -> CloudResult<RelayObject>;

    /// Progress of an export started from `source`
    async fn export_status(
        &self,
        source: &Snapshot,
        relay: &RelayObject,
    ) -> CloudResult<RelayStatus>;

    /// Import a relay object as a new snapshot of exactly `size_bytes`
    async fn import_snapshot(
        &self,
        zone: &ZoneId,
        relay: &RelayObject,
        name: &str,
        size_bytes: u64,
    ) -> CloudResult<Snapshot>;

    /// Register an image backed by a snapshot
    async fn create_image(&self, zone: &ZoneId, request: &ImageRequest) -> CloudResult<ZoneImage>;

    /// Look up an image; `None` when it does not exist
    async fn get_image(&self, zone: &ZoneId, image_id: &str) -> CloudResult<Option<ZoneImage>>;

    /// List images, optionally filtered by name
    ///
    /// Providers may match the filter loosely; callers compare names exactly.
    async fn list_images(
        &self,
        zone: &ZoneId,
        name_filter: Option<&str>,
    ) -> CloudResult<Vec<ZoneImage>>;

    async fn delete_image(&self, zone: &ZoneId, image_id: &str) -> CloudResult<()>;
}
