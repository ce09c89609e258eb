//! Build manifest handling
//!
//! The manifest is the packer-style JSON document that records which image a
//! build run produced:
//!
//! ```json
//! {
//!   "builds": [{
//!     "name": "talos",
//!     "builder_type": "scaleway",
//!     "build_time": 1763244168,
//!     "artifact_id": "fr-par-1:0a1b2c3d-...",
//!     "packer_run_uuid": "5e6f..."
//!   }],
//!   "last_run_uuid": "5e6f..."
//! }
//! ```
//!
//! `artifact_id` is `<zone>:<image id>`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::model::ZoneId;
use crate::error::ManifestError;

/// One build entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub builder_type: String,
    #[serde(default)]
    pub build_time: i64,
    pub artifact_id: String,
    #[serde(default)]
    pub packer_run_uuid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<serde_json::Value>,
}

/// Build manifest document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    #[serde(default)]
    pub builds: Vec<BuildRecord>,
    #[serde(default)]
    pub last_run_uuid: String,
}

/// Image a build run left behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginRef {
    pub zone: ZoneId,
    pub image_id: String,
}

impl OriginRef {
    /// Parse `<zone>:<image id>`
    pub fn parse(artifact_id: &str) -> Result<Self, ManifestError> {
        let invalid = || ManifestError::InvalidArtifact {
            artifact_id: artifact_id.to_string(),
        };
        let (zone, image_id) = artifact_id.split_once(':').ok_or_else(invalid)?;
        if zone.trim().is_empty() || image_id.trim().is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            zone: ZoneId::new(zone.trim()),
            image_id: image_id.trim().to_string(),
        })
    }

    /// Format as `<zone>:<image id>`
    pub fn artifact_id(&self) -> String {
        format!("{}:{}", self.zone, self.image_id)
    }
}

impl BuildManifest {
    /// Parse manifest JSON
    pub fn from_json(content: &str, path: &Path) -> Result<Self, ManifestError> {
        serde_json::from_str(content).map_err(|e| ManifestError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Load a manifest from disk
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        if !path.exists() {
            return Err(ManifestError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| ManifestError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_json(&content, path)
    }

    /// Load a manifest, or start an empty one if the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, ManifestError> {
        match Self::load(path) {
            Err(ManifestError::NotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Write the manifest as pretty JSON
    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        let content = serde_json::to_string_pretty(self).map_err(|e| ManifestError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        std::fs::write(path, content).map_err(|e| ManifestError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Append a build and mark its run as the latest
    pub fn record(&mut self, build: BuildRecord) {
        self.last_run_uuid.clone_from(&build.packer_run_uuid);
        self.builds.push(build);
    }

    /// The build produced by the last run
    ///
    /// Falls back to the last entry when no entry matches `last_run_uuid`.
    pub fn latest(&self) -> Option<&BuildRecord> {
        self.builds
            .iter()
            .rev()
            .find(|b| !self.last_run_uuid.is_empty() && b.packer_run_uuid == self.last_run_uuid)
            .or_else(|| self.builds.last())
    }

    /// Origin image of the last run
    pub fn origin(&self, path: &Path) -> Result<OriginRef, ManifestError> {
        let build = self.latest().ok_or_else(|| ManifestError::Empty {
            path: path.to_path_buf(),
        })?;
        OriginRef::parse(&build.artifact_id)
    }
}
