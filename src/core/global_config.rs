//! Global configuration management
//!
//! Reads optional settings from `config.toml` in the config directory (or an
//! explicit `--config` path). Every field is optional; accessors fall back to
//! [`crate::config::defaults`].
//!
//! ```toml
//! [factory]
//! base_url = "https://factory.talos.dev"
//! platform = "scaleway"
//! codec = "xz"
//!
//! [cloud]
//! project_id = "..."
//! architecture = "x86_64"
//!
//! [naming]
//! prefix = "talos-scaleway"
//!
//! [distribution]
//! zones = ["fr-par-1", "fr-par-2", "nl-ams-1"]
//! workers = 3
//!
//! [polling.export]
//! interval_secs = 15
//! timeout_secs = 5400
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::model::{Codec, ZoneId};
use super::poll::PollPolicy;
use crate::config::{defaults, urls};
use crate::error::DecompressionError;
use crate::infra::dirs::AppDirs;

/// Global configuration error types
#[derive(Error, Debug)]
pub enum GlobalConfigError {
    /// Failed to read config file
    #[error("Failed to read config file '{path}': {error}")]
    ReadError { path: String, error: String },

    /// Failed to parse config file
    #[error("Failed to parse config file '{path}': {error}")]
    ParseError { path: String, error: String },

    /// A value is syntactically valid but unusable
    #[error("Invalid value for '{key}': {error}")]
    InvalidValue { key: String, error: String },
}

/// Global configuration for imgrelay
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub factory: FactoryConfig,

    #[serde(default)]
    pub cloud: CloudConfig,

    #[serde(default)]
    pub naming: NamingConfig,

    #[serde(default)]
    pub distribution: DistributionConfig,

    #[serde(default)]
    pub polling: PollingConfig,
}

/// Image factory settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactoryConfig {
    pub base_url: Option<String>,
    pub platform: Option<String>,
    pub codec: Option<String>,
    /// Retry window for transient download failures, in seconds
    pub fetch_retry_secs: Option<u64>,
}

/// Cloud provider settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudConfig {
    pub api_url: Option<String>,
    pub project_id: Option<String>,
    pub architecture: Option<String>,
    pub volume_type: Option<String>,
}

/// Image naming settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamingConfig {
    pub prefix: Option<String>,
}

/// Cross-zone distribution settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistributionConfig {
    /// Zones used when `run` is given none
    #[serde(default)]
    pub zones: Vec<String>,
    pub workers: Option<usize>,
    /// Keep the versioned-unique image in target zones after aliasing
    pub keep_versioned_in_targets: Option<bool>,
    /// Delete snapshots orphaned by superseded images
    pub prune_snapshots: Option<bool>,
}

/// Polling overrides for one operation
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PollOverride {
    pub interval_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
}

impl PollOverride {
    fn apply(self, interval_secs: u64, timeout_secs: u64) -> PollPolicy {
        PollPolicy::new(
            Duration::from_secs(self.interval_secs.unwrap_or(interval_secs)),
            Duration::from_secs(self.timeout_secs.unwrap_or(timeout_secs)),
        )
    }
}

/// Polling overrides per operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default)]
    pub snapshot: PollOverride,
    #[serde(default)]
    pub export: PollOverride,
    #[serde(default)]
    pub import: PollOverride,
    #[serde(default)]
    pub image: PollOverride,
}

/// Effective poll policies for every long-running operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub snapshot: PollPolicy,
    pub export: PollPolicy,
    pub import: PollPolicy,
    pub image: PollPolicy,
}

impl PollSettings {
    /// Same short policy everywhere
    pub fn uniform(policy: PollPolicy) -> Self {
        Self {
            snapshot: policy,
            export: policy,
            import: policy,
            image: policy,
        }
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        PollingConfig::default().settings()
    }
}

impl PollingConfig {
    /// Resolve overrides against the built-in defaults
    pub fn settings(&self) -> PollSettings {
        PollSettings {
            snapshot: self.snapshot.apply(
                defaults::SNAPSHOT_POLL_INTERVAL_SECS,
                defaults::SNAPSHOT_POLL_TIMEOUT_SECS,
            ),
            export: self.export.apply(
                defaults::EXPORT_POLL_INTERVAL_SECS,
                defaults::EXPORT_POLL_TIMEOUT_SECS,
            ),
            import: self.import.apply(
                defaults::IMPORT_POLL_INTERVAL_SECS,
                defaults::IMPORT_POLL_TIMEOUT_SECS,
            ),
            image: self.image.apply(
                defaults::IMAGE_POLL_INTERVAL_SECS,
                defaults::IMAGE_POLL_TIMEOUT_SECS,
            ),
        }
    }
}

impl GlobalConfig {
    /// Load from the platform config directory
    ///
    /// A missing file yields the default configuration.
    pub fn load(dirs: &AppDirs) -> Result<Self, GlobalConfigError> {
        Self::load_from_path(&dirs.global_config_path())
    }

    /// Load from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, GlobalConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| GlobalConfigError::ReadError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| GlobalConfigError::ParseError {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }

    /// Image factory base URL
    #[must_use]
    pub fn factory_url(&self) -> &str {
        self.factory
            .base_url
            .as_deref()
            .unwrap_or(urls::IMAGE_FACTORY)
    }

    /// Factory target platform
    #[must_use]
    pub fn platform(&self) -> &str {
        self.factory
            .platform
            .as_deref()
            .unwrap_or(defaults::DEFAULT_PLATFORM)
    }

    /// Compression codec of factory images
    pub fn codec(&self) -> Result<Codec, GlobalConfigError> {
        let ext = self.factory.codec.as_deref().unwrap_or(defaults::DEFAULT_CODEC);
        Codec::from_extension(ext).map_err(|e: DecompressionError| GlobalConfigError::InvalidValue {
            key: "factory.codec".to_string(),
            error: e.to_string(),
        })
    }

    /// Retry window for transient fetch failures
    #[must_use]
    pub fn fetch_retry_window(&self) -> Duration {
        Duration::from_secs(
            self.factory
                .fetch_retry_secs
                .unwrap_or(defaults::FETCH_RETRY_WINDOW_SECS),
        )
    }

    /// Cloud API base URL
    #[must_use]
    pub fn api_url(&self) -> &str {
        self.cloud.api_url.as_deref().unwrap_or(urls::SCALEWAY_API)
    }

    /// Image architecture tag
    #[must_use]
    pub fn architecture(&self) -> &str {
        self.cloud
            .architecture
            .as_deref()
            .unwrap_or(defaults::DEFAULT_ARCHITECTURE)
    }

    /// Volume type for imported snapshots
    #[must_use]
    pub fn volume_type(&self) -> &str {
        self.cloud
            .volume_type
            .as_deref()
            .unwrap_or(defaults::DEFAULT_VOLUME_TYPE)
    }

    /// Image name prefix
    #[must_use]
    pub fn image_prefix(&self) -> &str {
        self.naming
            .prefix
            .as_deref()
            .unwrap_or(defaults::DEFAULT_IMAGE_PREFIX)
    }

    /// Zones used when none are given on the command line
    #[must_use]
    pub fn default_zones(&self) -> Vec<ZoneId> {
        self.distribution
            .zones
            .iter()
            .map(|z| ZoneId::new(z.as_str()))
            .collect()
    }

    /// Concurrent zone workers, at least one
    #[must_use]
    pub fn workers(&self) -> usize {
        self.distribution
            .workers
            .unwrap_or(defaults::DEFAULT_DISTRIBUTION_WORKERS)
            .max(1)
    }

    /// Whether target zones keep their versioned-unique image
    #[must_use]
    pub fn keep_versioned_in_targets(&self) -> bool {
        self.distribution.keep_versioned_in_targets.unwrap_or(false)
    }

    /// Whether orphaned snapshots are pruned
    #[must_use]
    pub fn prune_snapshots(&self) -> bool {
        self.distribution.prune_snapshots.unwrap_or(true)
    }

    /// Effective poll policies
    #[must_use]
    pub fn poll_settings(&self) -> PollSettings {
        self.polling.settings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = GlobalConfig::default();
        assert_eq!(config.factory_url(), urls::IMAGE_FACTORY);
        assert_eq!(config.platform(), "scaleway");
        assert_eq!(config.codec().unwrap(), Codec::Xz);
        assert_eq!(config.image_prefix(), "talos-scaleway");
        assert_eq!(config.workers(), defaults::DEFAULT_DISTRIBUTION_WORKERS);
        assert!(config.default_zones().is_empty());
        assert!(!config.keep_versioned_in_targets());
        assert!(config.prune_snapshots());
    }

    #[test]
    fn test_load_missing_file_returns_default() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let config = GlobalConfig::load_from_path(&config_path).unwrap();
        assert!(config.factory.base_url.is_none());
    }

    #[test]
    fn test_load_valid_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let content = r#"
[factory]
base_url = "http://localhost:8080"
codec = "gz"

[naming]
prefix = "talos-custom"

[distribution]
zones = ["fr-par-1", "nl-ams-1"]
workers = 0

[polling.export]
timeout_secs = 60
"#;
        fs::write(&config_path, content).unwrap();

        let config = GlobalConfig::load_from_path(&config_path).unwrap();
        assert_eq!(config.factory_url(), "http://localhost:8080");
        assert_eq!(config.codec().unwrap(), Codec::Gz);
        assert_eq!(config.image_prefix(), "talos-custom");
        assert_eq!(
            config.default_zones(),
            vec![ZoneId::new("fr-par-1"), ZoneId::new("nl-ams-1")]
        );
        // Zero workers would stall distribution
        assert_eq!(config.workers(), 1);

        let polls = config.poll_settings();
        assert_eq!(polls.export.timeout, Duration::from_secs(60));
        assert_eq!(
            polls.export.interval,
            Duration::from_secs(defaults::EXPORT_POLL_INTERVAL_SECS)
        );
        assert_eq!(
            polls.import.timeout,
            Duration::from_secs(defaults::IMPORT_POLL_TIMEOUT_SECS)
        );
    }

    #[test]
    fn test_invalid_codec() {
        let config: GlobalConfig = toml::from_str("[factory]\ncodec = \"zst\"").unwrap();
        assert!(matches!(
            config.codec(),
            Err(GlobalConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_load_invalid_toml_returns_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        fs::write(&config_path, "invalid toml [[[").unwrap();

        let result = GlobalConfig::load_from_path(&config_path);
        assert!(matches!(result, Err(GlobalConfigError::ParseError { .. })));
    }
}
