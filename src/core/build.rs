//! Build stage
//!
//! Resolve → fetch → decompress → write, strictly in sequence. Any error
//! aborts the stage. A successful write replaces the host's backing storage,
//! so callers must exit right after [`run_build`] returns `Ok`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;

use super::model::{ArtifactHandle, BuildSpecification, Codec};
use crate::config::defaults;
use crate::error::{BuildError, FetchError, ResolutionError};
use crate::infra::decompress::{self, RawImage};
use crate::infra::device::{self, WriteOptions, WriteReport};
use crate::infra::download::{FetchedArtifact, ProgressCallback};
use crate::infra::factory::ImageFactory;

/// Inputs of one build
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub specification: BuildSpecification,
    /// Release tag, e.g. `v1.11.5`
    pub version: String,
    pub platform: String,
    pub codec: Codec,
    pub device: PathBuf,
    /// Where the compressed and raw images are materialized
    pub work_dir: PathBuf,
    pub write: WriteOptions,
    pub retry: FetchRetry,
}

/// Backoff applied to transient fetch failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchRetry {
    pub initial: Duration,
    /// Total time spent retrying before the last error is returned
    pub window: Duration,
}

impl Default for FetchRetry {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(defaults::FETCH_RETRY_INITIAL_MS),
            window: Duration::from_secs(defaults::FETCH_RETRY_WINDOW_SECS),
        }
    }
}

/// What a completed build did
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub artifact: ArtifactHandle,
    pub download: FetchedArtifact,
    pub raw: RawImage,
    pub write: WriteReport,
}

/// Submit the specification and pair the identifier with `version`
pub async fn resolve(
    factory: &dyn ImageFactory,
    specification: &BuildSpecification,
    version: &str,
) -> Result<ArtifactHandle, ResolutionError> {
    let id = factory.submit_schematic(specification.as_bytes()).await?;
    Ok(ArtifactHandle {
        id,
        version: version.to_string(),
    })
}

/// Fetch with exponential backoff on transient failures
///
/// Every attempt restarts from zero. Client errors and empty bodies are
/// returned immediately.
pub async fn fetch_with_retry(
    factory: &dyn ImageFactory,
    handle: &ArtifactHandle,
    platform: &str,
    codec: Codec,
    dest: &Path,
    retry: FetchRetry,
    progress: Option<&ProgressCallback>,
) -> Result<FetchedArtifact, FetchError> {
    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(retry.initial)
        .with_max_elapsed_time(Some(retry.window))
        .build();

    backoff::future::retry(policy, move || async move {
        factory
            .fetch_artifact(handle, platform, codec, dest, progress)
            .await
            .map_err(|e| {
                if e.is_transient() {
                    tracing::warn!("Transient fetch failure, retrying: {}", e);
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
    })
    .await
}

/// File names used inside the work directory
fn work_files(
    work_dir: &Path,
    handle: &ArtifactHandle,
    platform: &str,
    codec: Codec,
) -> (PathBuf, PathBuf) {
    let stem = format!("{}-{}-{}.raw", platform, handle.version, handle.id);
    let compressed = work_dir.join(format!("{stem}.{}", codec.extension()));
    (compressed, work_dir.join(stem))
}

/// Run the whole build stage
pub async fn run_build(
    factory: &dyn ImageFactory,
    request: &BuildRequest,
    progress: Option<&ProgressCallback>,
) -> Result<BuildOutcome, BuildError> {
    let artifact = resolve(factory, &request.specification, &request.version).await?;
    tracing::info!("Artifact {} version {}", artifact.id, artifact.version);

    let (compressed, raw_path) = work_files(
        &request.work_dir,
        &artifact,
        &request.platform,
        request.codec,
    );
    let download = fetch_with_retry(
        factory,
        &artifact,
        &request.platform,
        request.codec,
        &compressed,
        request.retry,
        progress,
    )
    .await?;
    tracing::info!(
        "Fetched {} bytes (sha256 {})",
        download.size,
        download.checksum
    );

    let codec = request.codec;
    let input = download.path.clone();
    let output = raw_path.clone();
    let raw = tokio::task::spawn_blocking(move || decompress::decompress(&input, &output, codec))
        .await
        .map_err(|e| BuildError::Task(e.to_string()))??;

    let image = raw.path.clone();
    let target = request.device.clone();
    let options = request.write.clone();
    let written =
        tokio::task::spawn_blocking(move || device::write_image(&image, &target, &options))
            .await
            .map_err(|e| BuildError::Task(e.to_string()))?;

    let write = match written {
        Ok(report) => report,
        Err(e) => {
            // Recoverable failures leave the raw image for a retry
            if e.is_fatal() {
                tracing::error!("{}", e);
            }
            return Err(e.into());
        }
    };

    Ok(BuildOutcome {
        artifact,
        download,
        raw,
        write,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::factory::HttpImageFactory;
    use std::io::Write;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn quick_retry() -> FetchRetry {
        FetchRetry {
            initial: Duration::from_millis(5),
            window: Duration::from_secs(2),
        }
    }

    fn handle() -> ArtifactHandle {
        ArtifactHandle {
            id: "abc".to_string(),
            version: "v1.11.5".to_string(),
        }
    }

    #[test]
    fn test_work_files() {
        let (compressed, raw) = work_files(Path::new("/work"), &handle(), "scaleway", Codec::Xz);
        assert_eq!(
            compressed,
            PathBuf::from("/work/scaleway-v1.11.5-abc.raw.xz")
        );
        assert_eq!(raw, PathBuf::from("/work/scaleway-v1.11.5-abc.raw"));
    }

    #[tokio::test]
    async fn test_fetch_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/image/abc/v1.11.5/scaleway.raw.xz"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/image/abc/v1.11.5/scaleway.raw.xz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload".to_vec()))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("a.raw.xz");
        let factory = HttpImageFactory::with_url(server.uri());

        let fetched = fetch_with_retry(
            &factory,
            &handle(),
            "scaleway",
            Codec::Xz,
            &dest,
            quick_retry(),
            None,
        )
        .await
        .unwrap();
        assert_eq!(fetched.size, 7);
    }

    #[tokio::test]
    async fn test_fetch_does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("a.raw.xz");
        let factory = HttpImageFactory::with_url(server.uri());

        let err = fetch_with_retry(
            &factory,
            &handle(),
            "scaleway",
            Codec::Xz,
            &dest,
            quick_retry(),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_run_build_writes_file_target() {
        let server = MockServer::start().await;
        let raw: Vec<u8> = (0..64 * 1024u32).map(|i| (i % 199) as u8).collect();
        let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
        encoder.write_all(&raw).unwrap();
        let compressed = encoder.finish().unwrap();

        Mock::given(method("POST"))
            .and(path("/schematics"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "abc"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/image/abc/v1.11.5/scaleway.raw.xz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(compressed))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let device = temp.path().join("disk");
        std::fs::write(&device, b"old").unwrap();

        let request = BuildRequest {
            specification: BuildSpecification::new("customization: {}\n"),
            version: "v1.11.5".to_string(),
            platform: "scaleway".to_string(),
            codec: Codec::Xz,
            device: device.clone(),
            work_dir: temp.path().join("work"),
            write: WriteOptions {
                allow_regular_file: true,
                ..WriteOptions::default()
            },
            retry: quick_retry(),
        };

        let factory = HttpImageFactory::with_url(server.uri());
        let outcome = run_build(&factory, &request, None).await.unwrap();

        assert_eq!(outcome.artifact, handle());
        assert_eq!(outcome.write.bytes_written, raw.len() as u64);
        assert_eq!(std::fs::read(&device).unwrap(), raw);
        // Compressed download was consumed
        assert!(!outcome.download.path.exists());
    }

    #[tokio::test]
    async fn test_run_build_refuses_non_block_target() {
        let server = MockServer::start().await;
        let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
        encoder.write_all(b"raw image").unwrap();
        let compressed = encoder.finish().unwrap();

        Mock::given(method("POST"))
            .and(path("/schematics"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "abc"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(compressed))
            .mount(&server)
            .await;

        let temp = TempDir::new().unwrap();
        let device = temp.path().join("disk");
        std::fs::write(&device, b"old").unwrap();

        let request = BuildRequest {
            specification: BuildSpecification::new("x"),
            version: "v1.11.5".to_string(),
            platform: "scaleway".to_string(),
            codec: Codec::Xz,
            device: device.clone(),
            work_dir: temp.path().join("work"),
            write: WriteOptions::default(),
            retry: quick_retry(),
        };

        let factory = HttpImageFactory::with_url(server.uri());
        let err = run_build(&factory, &request, None).await.unwrap_err();
        assert!(!err.is_fatal());
        assert!(matches!(err, BuildError::Write(_)));
        assert_eq!(std::fs::read(&device).unwrap(), b"old");
    }
}
