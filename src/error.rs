//! Error types for imgrelay
//!
//! Domain-specific error types using thiserror. Every variant that concerns a
//! cloud resource names the zone and the resource identifier.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::core::global_config::GlobalConfigError;
use crate::core::model::ZoneId;

/// Schematic submission errors
#[derive(Error, Debug)]
pub enum ResolutionError {
    /// Network error
    #[error("Network error submitting schematic to '{url}': {error}")]
    Network { url: String, error: String },

    /// Non-2xx response
    #[error("Image factory at '{url}' returned HTTP {status}: {body}")]
    Status { url: String, status: u16, body: String },

    /// Response body could not be decoded
    #[error("Image factory at '{url}' returned a malformed response: {error}")]
    Malformed { url: String, error: String },

    /// Response decoded but carried no identifier
    #[error("Image factory at '{url}' returned no schematic identifier")]
    NoIdentifier { url: String },
}

/// Artifact download errors
#[derive(Error, Debug)]
pub enum FetchError {
    /// Network error
    #[error("Network error downloading '{url}': {error}")]
    Network { url: String, error: String },

    /// Non-2xx response
    #[error("Download of '{url}' failed with HTTP {status}")]
    Status { url: String, status: u16 },

    /// Transfer completed without any bytes
    #[error("Download of '{url}' produced an empty file")]
    Empty { url: String },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },
}

impl FetchError {
    /// Whether a fresh attempt may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Empty { .. } | Self::Io { .. } => false,
        }
    }
}

/// Decompression errors
#[derive(Error, Debug)]
pub enum DecompressionError {
    /// Codec is not supported
    #[error("Unrecognized compression codec '{codec}' (supported: xz, gz)")]
    UnknownCodec { codec: String },

    /// Compressed stream ended early or is corrupt
    #[error("Compressed stream '{path}' is truncated or corrupt: {error}")]
    Truncated { path: PathBuf, error: String },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },
}

/// Device write errors
///
/// Everything except [`WriteError::Fatal`] happens before the first byte of
/// the image reaches the device and can be retried.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Target does not exist
    #[error("Target device '{path}' does not exist")]
    DeviceNotFound { path: PathBuf },

    /// Target exists but is not a block device
    #[error("Target '{path}' is not a block device")]
    NotBlockDevice { path: PathBuf },

    /// Image does not fit on the device
    #[error("Image of {image} bytes does not fit on '{path}' ({device} bytes)")]
    ImageTooLarge { path: PathBuf, image: u64, device: u64 },

    /// Failure while inspecting or opening the target
    #[error("Cannot prepare '{path}' for writing: {error}")]
    Preflight { path: PathBuf, error: String },

    /// Failure while clearing partition signatures
    #[error("Failed to wipe signatures on '{path}': {error}")]
    Wipe { path: PathBuf, error: String },

    /// Failure during the overwrite; the device content is undefined
    #[error("FATAL: write to '{path}' failed after {written} bytes, device is in an undefined state: {error}")]
    Fatal { path: PathBuf, written: u64, error: String },
}

impl WriteError {
    /// Whether the device was left in an undefined state
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

/// Cloud capability errors
#[derive(Error, Debug, Clone)]
pub enum CloudError {
    /// Network error
    #[error("Network error during {operation}: {error}")]
    Network { operation: String, error: String },

    /// Non-2xx response
    #[error("{operation} failed with HTTP {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },

    /// Response body could not be decoded
    #[error("Could not decode response of {operation}: {error}")]
    Decode { operation: String, error: String },

    /// Resource does not exist
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// Provider refused the operation
    #[error("{operation} rejected: {reason}")]
    Rejected { operation: String, reason: String },
}

/// Outcome of a bounded wait that did not end in success
#[derive(Error, Debug)]
pub enum WaitError {
    /// Deadline passed
    #[error("timed out after {}s waiting for {what}", .elapsed.as_secs())]
    TimedOut { what: String, elapsed: Duration },

    /// Resource reached a terminal error state
    #[error("{what} failed: {reason}")]
    Failed { what: String, reason: String },

    /// Provider call failed while polling
    #[error(transparent)]
    Cloud(#[from] CloudError),
}

/// Snapshot publication errors (origin zone)
#[derive(Error, Debug)]
pub enum PublishError {
    /// Snapshot of the written volume failed
    #[error("Zone {zone}: snapshot of volume '{volume}' failed: {error}")]
    Snapshot {
        zone: ZoneId,
        volume: String,
        error: String,
    },

    /// Image registration failed
    #[error("Zone {zone}: image '{name}' could not be published: {error}")]
    Image {
        zone: ZoneId,
        name: String,
        error: String,
    },
}

/// Relay export errors
#[derive(Error, Debug)]
pub enum RelayError {
    /// Source snapshot could not be inspected
    #[error("Zone {zone}: source snapshot '{snapshot}' unavailable: {error}")]
    Source {
        zone: ZoneId,
        snapshot: String,
        error: String,
    },

    /// Export request failed
    #[error("Zone {zone}: export of snapshot '{snapshot}' to s3://{bucket}/{key} failed: {error}")]
    Export {
        zone: ZoneId,
        snapshot: String,
        bucket: String,
        key: String,
        error: String,
    },

    /// Relay object never became available
    #[error("Relay object s3://{bucket}/{key} not available after {}s", .elapsed.as_secs())]
    Timeout {
        bucket: String,
        key: String,
        elapsed: Duration,
    },
}

/// Relay import errors (target zones)
#[derive(Error, Debug)]
pub enum ImportError {
    /// Import request failed or the imported snapshot failed
    #[error("Zone {zone}: import of s3://{bucket}/{key} failed: {error}")]
    Snapshot {
        zone: ZoneId,
        bucket: String,
        key: String,
        error: String,
    },

    /// Imported snapshot never became available
    #[error("Zone {zone}: imported snapshot '{snapshot}' not available after {}s", .elapsed.as_secs())]
    Timeout {
        zone: ZoneId,
        snapshot: String,
        elapsed: Duration,
    },

    /// Image could not be published from the imported snapshot
    #[error("Zone {zone}: image '{name}' could not be published: {error}")]
    Image {
        zone: ZoneId,
        name: String,
        error: String,
    },
}

/// Alias reconciliation errors
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Existing images could not be listed
    #[error("Zone {zone}: listing images named '{name}' failed: {error}")]
    List {
        zone: ZoneId,
        name: String,
        error: String,
    },

    /// Stable alias could not be created or confirmed
    #[error("Zone {zone}: stable image '{name}' could not be established: {error}")]
    Alias {
        zone: ZoneId,
        name: String,
        error: String,
    },
}

/// Non-fatal reconciliation finding
///
/// Logged and reported in the run summary; never fails a zone.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ReconciliationWarning {
    /// Zone the finding concerns
    pub zone: ZoneId,
    /// Image or snapshot identifier
    pub resource: String,
    /// What went wrong
    pub message: String,
}

impl fmt::Display for ReconciliationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "zone {}: {}: {}", self.zone, self.resource, self.message)
    }
}

/// Per-zone stage names used in failure reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneStage {
    Import,
    Publish,
    Reconcile,
}

impl fmt::Display for ZoneStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Import => "import",
            Self::Publish => "publish",
            Self::Reconcile => "reconcile",
        };
        f.write_str(name)
    }
}

/// A zone that did not end with a live stable image
#[derive(Error, Debug, Clone, serde::Serialize)]
#[error("zone {zone} failed during {stage}: {error}")]
pub struct ZoneFailure {
    pub zone: ZoneId,
    pub stage: ZoneStage,
    pub error: String,
}

impl ZoneFailure {
    pub fn new(zone: ZoneId, stage: ZoneStage, error: impl fmt::Display) -> Self {
        Self {
            zone,
            stage,
            error: error.to_string(),
        }
    }
}

fn format_failures(failures: &[ZoneFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Cross-zone distribution errors
#[derive(Error, Debug)]
pub enum DistributionError {
    /// Origin image could not be resolved
    #[error("Zone {zone}: origin image '{image}' could not be resolved: {error}")]
    Origin {
        zone: ZoneId,
        image: String,
        error: String,
    },

    /// Export to the relay failed; no zone can proceed
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// One or more zones failed
    #[error("{} zone(s) failed: {}", .failures.len(), format_failures(.failures))]
    Zones { failures: Vec<ZoneFailure> },
}

/// Build manifest errors
#[derive(Error, Debug)]
pub enum ManifestError {
    /// Manifest missing
    #[error("Build manifest not found at '{path}'. Run 'imgrelay publish' or the image build first.")]
    NotFound { path: PathBuf },

    /// Manifest unreadable or unwritable
    #[error("IO error for manifest '{path}': {error}")]
    Io { path: PathBuf, error: String },

    /// Manifest is not valid JSON
    #[error("Failed to parse manifest '{path}': {error}")]
    Parse { path: PathBuf, error: String },

    /// Manifest holds no builds
    #[error("Manifest '{path}' contains no builds")]
    Empty { path: PathBuf },

    /// Artifact id is not `<zone>:<image id>`
    #[error("Invalid artifact id '{artifact_id}': expected '<zone>:<image id>'")]
    InvalidArtifact { artifact_id: String },
}

/// Build stage errors
#[derive(Error, Debug)]
pub enum BuildError {
    /// Schematic resolution failed
    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    /// Artifact download failed
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Decompression failed
    #[error("Decompression error: {0}")]
    Decompression(#[from] DecompressionError),

    /// Device write failed
    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    /// Build specification unreadable
    #[error("Cannot read build specification '{path}': {error}")]
    Specification { path: PathBuf, error: String },

    /// Blocking task panicked or was cancelled
    #[error("Build task aborted: {0}")]
    Task(String),
}

impl BuildError {
    /// Whether the build left the device in an undefined state
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Write(e) if e.is_fatal())
    }
}

/// Top-level imgrelay error type
#[derive(Error, Debug)]
pub enum ImgrelayError {
    /// Build stage error
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Publish error
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    /// Distribution error
    #[error("Distribution error: {0}")]
    Distribution(#[from] DistributionError),

    /// Manifest error
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] GlobalConfigError),
}
