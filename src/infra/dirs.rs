//! Platform-specific directory management
//!
//! Environment variables can override default directories:
//! - `IMGRELAY_CACHE_DIR` - working area for downloaded and decompressed images
//! - `IMGRELAY_CONFIG_DIR` - location of `config.toml`

use std::env;
use std::path::PathBuf;

/// Environment variable names for directory overrides
pub const ENV_CACHE_DIR: &str = "IMGRELAY_CACHE_DIR";
pub const ENV_CONFIG_DIR: &str = "IMGRELAY_CONFIG_DIR";

/// Application name used in directory paths
const APP_NAME: &str = "imgrelay";

/// Subdirectory holding transient image files
const WORK_SUBDIR: &str = "work";

/// Platform-specific directory provider
#[derive(Debug, Clone)]
pub struct AppDirs {
    cache_dir: PathBuf,
    config_dir: PathBuf,
}

impl AppDirs {
    /// Resolve directories from the environment, then platform defaults
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache_dir: Self::resolve(ENV_CACHE_DIR, dirs::cache_dir, ".cache"),
            config_dir: Self::resolve(ENV_CONFIG_DIR, dirs::config_dir, ".config"),
        }
    }

    /// Cache directory
    ///
    /// - Linux: `$XDG_CACHE_HOME/imgrelay` or `~/.cache/imgrelay`
    /// - macOS: `~/Library/Caches/imgrelay`
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone()
    }

    /// Config directory
    #[must_use]
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone()
    }

    /// Default working directory for the build stage
    ///
    /// Compressed and raw images are materialized here transiently.
    #[must_use]
    pub fn work_dir(&self) -> PathBuf {
        self.cache_dir.join(WORK_SUBDIR)
    }

    /// Path to `config.toml`
    #[must_use]
    pub fn global_config_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    fn resolve(var: &str, platform: fn() -> Option<PathBuf>, home_fallback: &str) -> PathBuf {
        if let Ok(path) = env::var(var) {
            return PathBuf::from(path);
        }

        platform().map(|p| p.join(APP_NAME)).unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(home_fallback)
                .join(APP_NAME)
        })
    }
}

impl Default for AppDirs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirs_are_resolved() {
        let dirs = AppDirs::new();
        assert!(!dirs.cache_dir().as_os_str().is_empty());
        assert!(!dirs.config_dir().as_os_str().is_empty());
    }

    #[test]
    fn test_work_dir_is_under_cache_dir() {
        let dirs = AppDirs::new();
        assert!(dirs.work_dir().starts_with(dirs.cache_dir()));
    }

    #[test]
    fn test_global_config_path_is_under_config_dir() {
        let dirs = AppDirs::new();
        assert!(dirs.global_config_path().starts_with(dirs.config_dir()));
        assert!(dirs.global_config_path().ends_with("config.toml"));
    }
}
