//! HTTP artifact download
//!
//! Streams a single download to disk while computing its SHA-256. There is no
//! resume: every attempt starts from zero and a failed attempt removes the
//! partial file. Retry policy belongs to the caller.

use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::FetchError;

/// Progress callback type for download progress reporting
pub type ProgressCallback = Box<dyn Fn(u64, u64) + Send + Sync>;

/// Downloaded artifact on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    /// Path to the downloaded file
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// SHA256 checksum of the downloaded content
    pub checksum: String,
}

/// Single-attempt streaming downloader
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    /// Create a downloader with default timeouts
    pub fn new() -> Self {
        Self::with_client(
            reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        )
    }

    /// Create a downloader sharing an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Download `url` to `dest`
    ///
    /// Succeeds only when the file exists and is non-empty. On any failure the
    /// partial file is removed.
    ///
    /// # Arguments
    /// * `url` - URL to download from
    /// * `dest` - Destination path
    /// * `progress` - Optional progress callback (`bytes_downloaded`, `total_bytes`)
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        progress: Option<&ProgressCallback>,
    ) -> Result<FetchedArtifact, FetchError> {
        let result = self.download_once(url, dest, progress).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }

    async fn download_once(
        &self,
        url: &str,
        dest: &Path,
        progress: Option<&ProgressCallback>,
    ) -> Result<FetchedArtifact, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network {
                url: url.to_string(),
                error: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let total_size = response.content_length().unwrap_or(0);

        // Create parent directories if needed
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchError::Io {
                    path: parent.to_path_buf(),
                    error: e.to_string(),
                })?;
        }

        let mut file = File::create(dest).await.map_err(|e| FetchError::Io {
            path: dest.to_path_buf(),
            error: e.to_string(),
        })?;

        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| FetchError::Network {
                url: url.to_string(),
                error: e.to_string(),
            })?;

            file.write_all(&chunk).await.map_err(|e| FetchError::Io {
                path: dest.to_path_buf(),
                error: e.to_string(),
            })?;

            hasher.update(&chunk);
            downloaded += chunk.len() as u64;

            if let Some(cb) = progress {
                cb(downloaded, total_size);
            }
        }

        file.flush().await.map_err(|e| FetchError::Io {
            path: dest.to_path_buf(),
            error: e.to_string(),
        })?;

        if downloaded == 0 {
            return Err(FetchError::Empty {
                url: url.to_string(),
            });
        }

        let checksum = hex::encode(hasher.finalize());
        tracing::debug!(
            "Downloaded {} bytes from {} (sha256 {})",
            downloaded,
            url,
            checksum
        );

        Ok(FetchedArtifact {
            path: dest.to_path_buf(),
            size: downloaded,
            checksum,
        })
    }
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new()
    }
}
