//! Image factory client
//!
//! The factory turns a schematic document into a content-addressed
//! identifier and serves prebuilt disk images for it.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use super::download::{Downloader, FetchedArtifact, ProgressCallback};
use crate::config::urls;
use crate::core::model::{ArtifactHandle, Codec};
use crate::error::{FetchError, ResolutionError};

/// Schematic submission and artifact download
#[async_trait]
pub trait ImageFactory: Send + Sync {
    /// Submit a schematic document; returns its content-derived identifier
    ///
    /// Resubmitting an unchanged document yields the same identifier.
    async fn submit_schematic(&self, document: &[u8]) -> Result<String, ResolutionError>;

    /// Download URL of the disk image for `handle`
    fn artifact_url(&self, handle: &ArtifactHandle, platform: &str, codec: Codec) -> String;

    /// Download the disk image to `dest` in a single attempt
    async fn fetch_artifact(
        &self,
        handle: &ArtifactHandle,
        platform: &str,
        codec: Codec,
        dest: &Path,
        progress: Option<&ProgressCallback>,
    ) -> Result<FetchedArtifact, FetchError>;
}

#[derive(Debug, Deserialize)]
struct SchematicResponse {
    #[serde(default)]
    id: Option<String>,
}

/// HTTP image factory
#[derive(Debug, Clone)]
pub struct HttpImageFactory {
    client: reqwest::Client,
    downloader: Downloader,
    base_url: String,
}

impl HttpImageFactory {
    /// Create a client for the public factory
    pub fn new() -> Self {
        Self::with_url(urls::IMAGE_FACTORY)
    }

    /// Create a client for a custom factory URL
    pub fn with_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::new();
        Self {
            downloader: Downloader::with_client(client.clone()),
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Factory base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Default for HttpImageFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageFactory for HttpImageFactory {
    async fn submit_schematic(&self, document: &[u8]) -> Result<String, ResolutionError> {
        let url = format!("{}/schematics", self.base_url);
        let response = self
            .client
            .post(&url)
            .body(document.to_vec())
            .send()
            .await
            .map_err(|e| ResolutionError::Network {
                url: url.clone(),
                error: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ResolutionError::Status {
                url,
                status: status.as_u16(),
                body,
            });
        }

        let parsed: SchematicResponse =
            response.json().await.map_err(|e| ResolutionError::Malformed {
                url: url.clone(),
                error: e.to_string(),
            })?;

        match parsed.id {
            Some(id) if !id.trim().is_empty() => {
                tracing::info!("Schematic resolved to {}", id);
                Ok(id)
            }
            _ => Err(ResolutionError::NoIdentifier { url }),
        }
    }

    fn artifact_url(&self, handle: &ArtifactHandle, platform: &str, codec: Codec) -> String {
        format!(
            "{}/image/{}/{}/{}.raw.{}",
            self.base_url,
            handle.id,
            handle.version,
            platform,
            codec.extension()
        )
    }

    async fn fetch_artifact(
        &self,
        handle: &ArtifactHandle,
        platform: &str,
        codec: Codec,
        dest: &Path,
        progress: Option<&ProgressCallback>,
    ) -> Result<FetchedArtifact, FetchError> {
        let url = self.artifact_url(handle, platform, codec);
        tracing::info!("Downloading {}", url);
        self.downloader.download(&url, dest, progress).await
    }
}
