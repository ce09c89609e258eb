//! Scaleway Instance API client
//!
//! Implements [`CloudProvider`] over the Instance API v1. A snapshot export
//! returns a task, and the export is complete once that task reaches
//! `success`. The source snapshot reads `available` both before and after
//! an export, so its state alone never proves the relay object exists.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::cloud::{CloudProvider, CloudResult};
use crate::config::{defaults, urls};
use crate::core::model::{
    ImageRequest, ImageState, RelayObject, RelayStatus, Snapshot, SnapshotStatus, ZoneId,
    ZoneImage,
};
use crate::error::CloudError;

/// Images requested per page when listing
const PAGE_SIZE: usize = 100;

/// Authentication header
const AUTH_HEADER: &str = "X-Auth-Token";

/// Scaleway credentials and endpoint
#[derive(Debug, Clone)]
pub struct ScalewayConfig {
    pub api_url: String,
    pub secret_key: String,
    pub project_id: String,
    pub volume_type: String,
}

impl ScalewayConfig {
    pub fn new(secret_key: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            api_url: urls::SCALEWAY_API.to_string(),
            secret_key: secret_key.into(),
            project_id: project_id.into(),
            volume_type: defaults::DEFAULT_VOLUME_TYPE.to_string(),
        }
    }

    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    #[must_use]
    pub fn with_volume_type(mut self, volume_type: impl Into<String>) -> Self {
        self.volume_type = volume_type.into();
        self
    }
}

/// [`CloudProvider`] backed by the Scaleway Instance API
#[derive(Debug, Clone)]
pub struct ScalewayCloud {
    client: reqwest::Client,
    config: ScalewayConfig,
}

#[derive(Debug, Deserialize)]
struct ApiSnapshot {
    id: String,
    #[serde(default)]
    size: u64,
    state: String,
}

#[derive(Debug, Deserialize)]
struct SnapshotEnvelope {
    snapshot: ApiSnapshot,
}

#[derive(Debug, Deserialize)]
struct ApiTask {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct TaskEnvelope {
    task: ApiTask,
}

#[derive(Debug, Deserialize)]
struct ExportEnvelope {
    task: Option<ApiTask>,
}

#[derive(Debug, Deserialize)]
struct ApiVolumeRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiImage {
    id: String,
    name: String,
    #[serde(default)]
    arch: String,
    creation_date: Option<DateTime<Utc>>,
    root_volume: Option<ApiVolumeRef>,
    state: String,
}

#[derive(Debug, Deserialize)]
struct ImageEnvelope {
    image: ApiImage,
}

#[derive(Debug, Deserialize)]
struct ImageList {
    images: Vec<ApiImage>,
    total_count: Option<usize>,
}

#[derive(Debug, Serialize)]
struct CreateSnapshotBody<'a> {
    name: &'a str,
    volume_id: &'a str,
    project: &'a str,
}

#[derive(Debug, Serialize)]
struct ImportSnapshotBody<'a> {
    name: &'a str,
    project: &'a str,
    volume_type: &'a str,
    bucket: &'a str,
    key: &'a str,
    size: u64,
}

#[derive(Debug, Serialize)]
struct ExportSnapshotBody<'a> {
    bucket: &'a str,
    key: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateImageBody<'a> {
    name: &'a str,
    root_volume: &'a str,
    arch: &'a str,
    project: &'a str,
    tags: &'a [String],
}

fn snapshot_status(state: &str) -> SnapshotStatus {
    match state {
        "available" | "exporting" => SnapshotStatus::Available,
        "error" | "invalid_data" => SnapshotStatus::Error,
        _ => SnapshotStatus::Pending,
    }
}

fn task_status(task: &ApiTask, relay: &RelayObject) -> RelayStatus {
    match task.status.as_str() {
        "success" => RelayStatus::Available,
        "failure" => RelayStatus::Failed(format!(
            "export task {} failed writing s3://{}/{}",
            task.id, relay.bucket, relay.key
        )),
        _ => RelayStatus::Pending,
    }
}

fn image_state(state: &str) -> ImageState {
    match state {
        "available" => ImageState::Available,
        "error" => ImageState::Error,
        _ => ImageState::Creating,
    }
}

impl ApiSnapshot {
    fn into_model(self, zone: &ZoneId) -> Snapshot {
        Snapshot {
            status: snapshot_status(&self.state),
            id: self.id,
            zone: zone.clone(),
            size_bytes: self.size,
        }
    }
}

impl ApiImage {
    fn into_model(self, zone: &ZoneId) -> ZoneImage {
        ZoneImage {
            zone: zone.clone(),
            state: image_state(&self.state),
            image_id: self.id,
            name: self.name,
            snapshot_id: self.root_volume.map(|v| v.id).unwrap_or_default(),
            created_at: self.creation_date.unwrap_or_else(Utc::now),
            arch: self.arch,
        }
    }
}

impl ScalewayCloud {
    pub fn new(config: ScalewayConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, config }
    }

    fn zone_url(&self, zone: &ZoneId, path: &str) -> String {
        format!(
            "{}/instance/v1/zones/{}/{}",
            self.config.api_url.trim_end_matches('/'),
            zone,
            path
        )
    }

    async fn send(
        &self,
        operation: &str,
        request: reqwest::RequestBuilder,
    ) -> CloudResult<reqwest::Response> {
        let response = request
            .header(AUTH_HEADER, &self.config.secret_key)
            .send()
            .await
            .map_err(|e| CloudError::Network {
                operation: operation.to_string(),
                error: e.to_string(),
            })?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        tracing::debug!("{} failed with HTTP {}: {}", operation, status, body);
        Err(CloudError::Status {
            operation: operation.to_string(),
            status,
            body,
        })
    }

    async fn decode<T: DeserializeOwned>(
        operation: &str,
        response: reqwest::Response,
    ) -> CloudResult<T> {
        response.json::<T>().await.map_err(|e| CloudError::Decode {
            operation: operation.to_string(),
            error: e.to_string(),
        })
    }

    fn not_found(err: CloudError, resource: String) -> CloudError {
        match err {
            CloudError::Status { status: 404, .. } => CloudError::NotFound { resource },
            other => other,
        }
    }
}

#[async_trait]
impl CloudProvider for ScalewayCloud {
    async fn create_snapshot(
        &self,
        zone: &ZoneId,
        volume_id: &str,
        name: &str,
    ) -> CloudResult<Snapshot> {
        let operation = format!("snapshot of volume {volume_id} in {zone}");
        let body = CreateSnapshotBody {
            name,
            volume_id,
            project: &self.config.project_id,
        };
        let request = self.client.post(self.zone_url(zone, "snapshots")).json(&body);
        let response = self.send(&operation, request).await?;
        let envelope: SnapshotEnvelope = Self::decode(&operation, response).await?;
        Ok(envelope.snapshot.into_model(zone))
    }

    async fn get_snapshot(&self, zone: &ZoneId, snapshot_id: &str) -> CloudResult<Snapshot> {
        let operation = format!("lookup of snapshot {snapshot_id} in {zone}");
        let request = self
            .client
            .get(self.zone_url(zone, &format!("snapshots/{snapshot_id}")));
        let response = self
            .send(&operation, request)
            .await
            .map_err(|e| Self::not_found(e, format!("snapshot {snapshot_id} in {zone}")))?;
        let envelope: SnapshotEnvelope = Self::decode(&operation, response).await?;
        Ok(envelope.snapshot.into_model(zone))
    }

    async fn delete_snapshot(&self, zone: &ZoneId, snapshot_id: &str) -> CloudResult<()> {
        let operation = format!("deletion of snapshot {snapshot_id} in {zone}");
        let request = self
            .client
            .delete(self.zone_url(zone, &format!("snapshots/{snapshot_id}")));
        self.send(&operation, request)
            .await
            .map_err(|e| Self::not_found(e, format!("snapshot {snapshot_id} in {zone}")))?;
        Ok(())
    }

    async fn export_snapshot(
        &self,
        zone: &ZoneId,
        snapshot_id: &str,
        bucket: &str,
        key: &str,
    ) -> CloudResult<RelayObject> {
        let source = self.get_snapshot(zone, snapshot_id).await?;
        let operation = format!("export of snapshot {snapshot_id} in {zone}");
        let request = self
            .client
            .post(self.zone_url(zone, &format!("snapshots/{snapshot_id}/export")))
            .json(&ExportSnapshotBody { bucket, key });
        let response = self.send(&operation, request).await?;
        let envelope: ExportEnvelope = Self::decode(&operation, response).await?;
        let task_id = envelope.task.map(|t| t.id);
        if task_id.is_none() {
            tracing::warn!(
                "{} returned no task; completion will be read from the snapshot state",
                operation
            );
        }

        // Object size is only known to object storage; the snapshot size is
        // the upper bound reported until then.
        Ok(RelayObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
            size_bytes: source.size_bytes,
            task_id,
        })
    }

    async fn export_status(
        &self,
        source: &Snapshot,
        relay: &RelayObject,
    ) -> CloudResult<RelayStatus> {
        if let Some(task_id) = &relay.task_id {
            let operation = format!("lookup of task {task_id} in {}", source.zone);
            let request = self
                .client
                .get(self.zone_url(&source.zone, &format!("tasks/{task_id}")));
            let response = self.send(&operation, request).await?;
            let envelope: TaskEnvelope = Self::decode(&operation, response).await?;
            return Ok(task_status(&envelope.task, relay));
        }

        let operation = format!("lookup of snapshot {} in {}", source.id, source.zone);
        let request = self
            .client
            .get(self.zone_url(&source.zone, &format!("snapshots/{}", source.id)));
        let response = self.send(&operation, request).await?;
        let envelope: SnapshotEnvelope = Self::decode(&operation, response).await?;

        let status = match envelope.snapshot.state.as_str() {
            "available" => RelayStatus::Available,
            "error" | "invalid_data" => RelayStatus::Failed(format!(
                "snapshot {} entered state '{}' while exporting to s3://{}/{}",
                source.id, envelope.snapshot.state, relay.bucket, relay.key
            )),
            _ => RelayStatus::Pending,
        };
        Ok(status)
    }

    async fn import_snapshot(
        &self,
        zone: &ZoneId,
        relay: &RelayObject,
        name: &str,
        size_bytes: u64,
    ) -> CloudResult<Snapshot> {
        let operation = format!("import of s3://{}/{} into {zone}", relay.bucket, relay.key);
        let body = ImportSnapshotBody {
            name,
            project: &self.config.project_id,
            volume_type: &self.config.volume_type,
            bucket: &relay.bucket,
            key: &relay.key,
            size: size_bytes,
        };
        let request = self.client.post(self.zone_url(zone, "snapshots")).json(&body);
        let response = self.send(&operation, request).await?;
        let envelope: SnapshotEnvelope = Self::decode(&operation, response).await?;
        Ok(envelope.snapshot.into_model(zone))
    }

    async fn create_image(&self, zone: &ZoneId, request: &ImageRequest) -> CloudResult<ZoneImage> {
        let operation = format!("creation of image {} in {zone}", request.name);
        let body = CreateImageBody {
            name: &request.name,
            root_volume: &request.snapshot_id,
            arch: &request.arch,
            project: &self.config.project_id,
            tags: &request.tags,
        };
        let http = self.client.post(self.zone_url(zone, "images")).json(&body);
        let response = self.send(&operation, http).await?;
        let envelope: ImageEnvelope = Self::decode(&operation, response).await?;
        Ok(envelope.image.into_model(zone))
    }

    async fn get_image(&self, zone: &ZoneId, image_id: &str) -> CloudResult<Option<ZoneImage>> {
        let operation = format!("lookup of image {image_id} in {zone}");
        let request = self
            .client
            .get(self.zone_url(zone, &format!("images/{image_id}")));
        let response = match self.send(&operation, request).await {
            Ok(response) => response,
            Err(CloudError::Status { status: 404, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let envelope: ImageEnvelope = Self::decode(&operation, response).await?;
        Ok(Some(envelope.image.into_model(zone)))
    }

    async fn list_images(
        &self,
        zone: &ZoneId,
        name_filter: Option<&str>,
    ) -> CloudResult<Vec<ZoneImage>> {
        let operation = format!("listing of images in {zone}");
        let mut images = Vec::new();
        let mut page = 1usize;

        loop {
            let mut query = vec![
                ("page", page.to_string()),
                ("per_page", PAGE_SIZE.to_string()),
            ];
            if let Some(name) = name_filter {
                query.push(("name", name.to_string()));
            }
            let request = self.client.get(self.zone_url(zone, "images")).query(&query);
            let response = self.send(&operation, request).await?;
            let header_total = response
                .headers()
                .get("x-total-count")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<usize>().ok());
            let list: ImageList = Self::decode(&operation, response).await?;

            let received = list.images.len();
            images.extend(list.images.into_iter().map(|i| i.into_model(zone)));

            let done = match list.total_count.or(header_total) {
                Some(total) => images.len() >= total,
                None => received < PAGE_SIZE,
            };
            if done || received == 0 {
                break;
            }
            page += 1;
        }

        tracing::debug!("Listed {} image(s) in {}", images.len(), zone);
        Ok(images)
    }

    async fn delete_image(&self, zone: &ZoneId, image_id: &str) -> CloudResult<()> {
        let operation = format!("deletion of image {image_id} in {zone}");
        let request = self
            .client
            .delete(self.zone_url(zone, &format!("images/{image_id}")));
        self.send(&operation, request)
            .await
            .map_err(|e| Self::not_found(e, format!("image {image_id} in {zone}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_state_mapping() {
        assert_eq!(snapshot_status("available"), SnapshotStatus::Available);
        assert_eq!(snapshot_status("exporting"), SnapshotStatus::Available);
        assert_eq!(snapshot_status("snapshotting"), SnapshotStatus::Pending);
        assert_eq!(snapshot_status("importing"), SnapshotStatus::Pending);
        assert_eq!(snapshot_status("error"), SnapshotStatus::Error);
    }

    #[test]
    fn test_task_status_mapping() {
        let relay = RelayObject {
            bucket: "relay".to_string(),
            key: "image.qcow2".to_string(),
            size_bytes: 1,
            task_id: Some("task-1".to_string()),
        };
        let task = |status: &str| ApiTask {
            id: "task-1".to_string(),
            status: status.to_string(),
        };

        assert_eq!(
            task_status(&task("success"), &relay),
            RelayStatus::Available
        );
        assert_eq!(task_status(&task("pending"), &relay), RelayStatus::Pending);
        assert_eq!(task_status(&task("started"), &relay), RelayStatus::Pending);
        assert!(matches!(
            task_status(&task("failure"), &relay),
            RelayStatus::Failed(reason) if reason.contains("task-1")
        ));
    }

    #[test]
    fn test_image_state_mapping() {
        assert_eq!(image_state("available"), ImageState::Available);
        assert_eq!(image_state("creating"), ImageState::Creating);
        assert_eq!(image_state("error"), ImageState::Error);
    }

    #[test]
    fn test_zone_url() {
        let cloud = ScalewayCloud::new(
            ScalewayConfig::new("secret", "project").with_api_url("http://localhost:1234/"),
        );
        assert_eq!(
            cloud.zone_url(&ZoneId::new("fr-par-1"), "images/abc"),
            "http://localhost:1234/instance/v1/zones/fr-par-1/images/abc"
        );
    }

    #[test]
    fn test_image_without_root_volume() {
        let json = r#"{"id": "img", "name": "n", "state": "creating"}"#;
        let image: ApiImage = serde_json::from_str(json).unwrap();
        let model = image.into_model(&ZoneId::new("nl-ams-1"));
        assert!(model.snapshot_id.is_empty());
        assert_eq!(model.state, ImageState::Creating);
    }
}
