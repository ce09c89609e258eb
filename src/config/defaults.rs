//! Default configuration values

/// Target platform passed to the image factory
pub const DEFAULT_PLATFORM: &str = "scaleway";

/// Compression codec of factory disk images
pub const DEFAULT_CODEC: &str = "xz";

/// Prefix of published image names
pub const DEFAULT_IMAGE_PREFIX: &str = "talos-scaleway";

/// Image architecture tag
pub const DEFAULT_ARCHITECTURE: &str = "x86_64";

/// Volume type requested for imported snapshots
pub const DEFAULT_VOLUME_TYPE: &str = "l_ssd";

/// How long transient fetch failures are retried before giving up (seconds)
pub const FETCH_RETRY_WINDOW_SECS: u64 = 300;

/// First backoff delay between fetch attempts (milliseconds)
pub const FETCH_RETRY_INITIAL_MS: u64 = 1000;

/// Maximum number of zones processed concurrently
pub const DEFAULT_DISTRIBUTION_WORKERS: usize = 4;

/// Snapshot creation polling (seconds)
pub const SNAPSHOT_POLL_INTERVAL_SECS: u64 = 5;
pub const SNAPSHOT_POLL_TIMEOUT_SECS: u64 = 30 * 60;

/// Relay export polling (seconds)
pub const EXPORT_POLL_INTERVAL_SECS: u64 = 10;
pub const EXPORT_POLL_TIMEOUT_SECS: u64 = 60 * 60;

/// Relay import polling (seconds)
pub const IMPORT_POLL_INTERVAL_SECS: u64 = 10;
pub const IMPORT_POLL_TIMEOUT_SECS: u64 = 60 * 60;

/// Image availability polling (seconds)
pub const IMAGE_POLL_INTERVAL_SECS: u64 = 2;
pub const IMAGE_POLL_TIMEOUT_SECS: u64 = 5 * 60;

/// Copy buffer used when writing a raw image to a device
pub const DEVICE_WRITE_CHUNK: usize = 4 * 1024 * 1024;

/// Bytes zeroed at each end of a device to clear partition signatures
pub const SIGNATURE_WIPE_BYTES: u64 = 1024 * 1024;

/// Build manifest location, relative to the working directory
pub const MANIFEST_PATH: &str = "manifest.json";

/// Extension appended to relay object keys
pub const RELAY_KEY_EXTENSION: &str = "qcow2";

/// Process exit code after a failed device overwrite
pub const EXIT_FATAL_WRITE: i32 = 2;
