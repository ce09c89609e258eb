//! Pipeline data model
//!
//! Plain values exchanged between the stages. None of these types perform I/O.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DecompressionError;

/// Availability zone identifier, e.g. `fr-par-1`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneId(String);

impl ZoneId {
    pub fn new(zone: impl Into<String>) -> Self {
        Self(zone.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ZoneId {
    fn from(zone: &str) -> Self {
        Self::new(zone)
    }
}

/// Declarative image customization document
///
/// Opaque to the pipeline; submitted verbatim to the image factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpecification {
    document: Vec<u8>,
}

impl BuildSpecification {
    pub fn new(document: impl Into<Vec<u8>>) -> Self {
        Self {
            document: document.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.document
    }
}

/// Factory result for a submitted specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactHandle {
    /// Content hash of the specification
    pub id: String,
    /// Release tag supplied by the caller
    pub version: String,
}

/// Compression codec of a downloaded disk image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Xz,
    Gz,
}

impl Codec {
    /// Parse a codec from its file extension
    pub fn from_extension(ext: &str) -> Result<Self, DecompressionError> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "xz" => Ok(Self::Xz),
            "gz" | "gzip" => Ok(Self::Gz),
            other => Err(DecompressionError::UnknownCodec {
                codec: other.to_string(),
            }),
        }
    }

    /// File extension used in artifact URLs
    pub fn extension(self) -> &'static str {
        match self {
            Self::Xz => "xz",
            Self::Gz => "gz",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Provider-side state of a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Pending,
    Available,
    Error,
}

/// Zone-local block-storage snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub zone: ZoneId,
    pub size_bytes: u64,
    pub status: SnapshotStatus,
}

/// Provider-side state of an image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageState {
    Creating,
    #[default]
    Available,
    Error,
}

/// Machine image registered in one zone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneImage {
    pub zone: ZoneId,
    pub image_id: String,
    pub name: String,
    pub snapshot_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub state: ImageState,
}

/// Parameters for registering an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub name: String,
    pub snapshot_id: String,
    pub arch: String,
    pub tags: Vec<String>,
}

/// Object-storage copy of a snapshot used to cross zones
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayObject {
    pub bucket: String,
    pub key: String,
    pub size_bytes: u64,
    /// Provider task tracking the export, when the provider reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// Export progress of a relay object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayStatus {
    Pending,
    Available,
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_from_extension() {
        assert_eq!(Codec::from_extension("xz").unwrap(), Codec::Xz);
        assert_eq!(Codec::from_extension(".XZ").unwrap(), Codec::Xz);
        assert_eq!(Codec::from_extension("gz").unwrap(), Codec::Gz);
        assert!(matches!(
            Codec::from_extension("zst"),
            Err(DecompressionError::UnknownCodec { codec }) if codec == "zst"
        ));
    }

    #[test]
    fn test_zone_image_deserializes_without_optional_fields() {
        let json = r#"{
            "zone": "fr-par-1",
            "image_id": "img-1",
            "name": "talos-scaleway-v1.11.5",
            "snapshot_id": "snap-1",
            "created_at": "2025-11-15T22:02:48Z"
        }"#;
        let image: ZoneImage = serde_json::from_str(json).unwrap();
        assert_eq!(image.zone, ZoneId::new("fr-par-1"));
        assert_eq!(image.state, ImageState::Available);
        assert!(image.arch.is_empty());
    }
}
