//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests.

#![allow(dead_code)]

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output};
use std::sync::Arc;

use tempfile::TempDir;

use imgrelay::core::distribute::Distributor;
use imgrelay::core::global_config::PollSettings;
use imgrelay::core::model::ZoneId;
use imgrelay::core::naming::TimestampSuffix;
use imgrelay::core::pipeline::Pipeline;
use imgrelay::core::poll::PollPolicy;
use imgrelay::core::reconcile::{AliasReconciler, ReconcileOptions};
use imgrelay::infra::memory::MemoryCloud;

/// Versioned-unique name used across scenarios
pub const VERSIONED: &str = "talos-scaleway-v1.11.5-20251115220248";

/// Stable alias of [`VERSIONED`]
pub const STABLE: &str = "talos-scaleway-v1.11.5";

/// Snapshot size of a 10 GiB image
pub const IMAGE_SIZE: u64 = 10 * 1024 * 1024 * 1024;

/// Test project context
///
/// Creates a temporary working directory and runs the binary inside it.
pub struct TestProject {
    /// Temporary directory for the test project
    pub dir: TempDir,
}

impl TestProject {
    /// Create a new test project in a temporary directory
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Get the path to the test project directory
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Create a file in the test project
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    /// Check if a file exists in the test project
    pub fn file_exists(&self, name: &str) -> bool {
        self.dir.path().join(name).exists()
    }

    /// Read a file from the test project
    pub fn read_file(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(name)).expect("Failed to read file")
    }

    /// Run imgrelay in the project directory
    ///
    /// Config and cache directories point inside the project so the host's
    /// settings never leak into a test. Credentials are cleared.
    pub fn run(&self, args: &[&str]) -> Output {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_imgrelay"));
        cmd.current_dir(self.path())
            .env("IMGRELAY_CONFIG_DIR", self.path().join(".config"))
            .env("IMGRELAY_CACHE_DIR", self.path().join(".cache"))
            .env_remove("SCW_SECRET_KEY")
            .env_remove("SCW_DEFAULT_PROJECT_ID")
            .env_remove("RUST_LOG")
            .args(args);
        cmd.output().expect("Failed to execute imgrelay")
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Sample packer manifest pointing at `fr-par-1:img-origin`
pub const SAMPLE_MANIFEST: &str = r#"{
  "builds": [
    {
      "name": "talos",
      "builder_type": "scaleway",
      "build_time": 1763244168,
      "artifact_id": "fr-par-1:img-origin",
      "packer_run_uuid": "run-1"
    }
  ],
  "last_run_uuid": "run-1"
}"#;

/// Zone handle
pub fn zone(name: &str) -> ZoneId {
    ZoneId::new(name)
}

/// Pipeline over `cloud` with short polls and default cleanup
pub fn pipeline(cloud: &Arc<MemoryCloud>) -> Pipeline {
    pipeline_with(cloud, ReconcileOptions::default(), 4)
}

/// Pipeline over `cloud` with explicit cleanup switches and worker count
pub fn pipeline_with(
    cloud: &Arc<MemoryCloud>,
    options: ReconcileOptions,
    workers: usize,
) -> Pipeline {
    let polls = PollSettings::uniform(PollPolicy::immediate());
    let distributor = Distributor::new(cloud.clone(), Arc::new(TimestampSuffix), polls)
        .with_workers(workers);
    let reconciler = AliasReconciler::new(cloud.clone(), polls, options);
    Pipeline::new(cloud.clone(), distributor, reconciler)
}

/// xz-compress `data`
pub fn xz(data: &[u8]) -> Vec<u8> {
    let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
    encoder.write_all(data).expect("Failed to compress");
    encoder.finish().expect("Failed to finish xz stream")
}

/// gzip-compress `data`
pub fn gz(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).expect("Failed to compress");
    encoder.finish().expect("Failed to finish gzip stream")
}

/// Deterministic raw image content of `len` bytes
pub fn raw_image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
