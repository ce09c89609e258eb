//! Image naming
//!
//! Published images carry a *versioned-unique* name,
//! `{prefix}-{version}-{YYYYMMDDhhmmss}`. Downstream consumers use the
//! *stable* name, `{prefix}-{version}`, obtained by stripping the timestamp
//! through a [`NamingStrategy`].

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::config::defaults::RELAY_KEY_EXTENSION;

/// Timestamp layout appended at publish time
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Derives the stable alias of a versioned-unique image name
pub trait NamingStrategy: Send + Sync {
    /// Stable name for `versioned_name`; returns the input unchanged when it
    /// carries no recognizable build suffix.
    fn stable_name(&self, versioned_name: &str) -> String;
}

/// Strips trailing `-YYYYMMDDhhmmss` tokens
///
/// Only 14-digit tokens count as a suffix, so `talos-v1.2.3` stays
/// `talos-v1.2.3`. Repeated tokens are all removed, which keeps the strategy
/// idempotent.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampSuffix;

fn suffix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<stable>.+?)(?:-\d{14})+$").expect("static regex is valid")
    })
}

impl NamingStrategy for TimestampSuffix {
    fn stable_name(&self, versioned_name: &str) -> String {
        suffix_pattern()
            .captures(versioned_name)
            .and_then(|caps| caps.name("stable"))
            .map_or_else(|| versioned_name.to_string(), |m| m.as_str().to_string())
    }
}

/// Stable name, `{prefix}-{version}`
pub fn stable_name_for(prefix: &str, version: &str) -> String {
    format!("{prefix}-{version}")
}

/// Versioned-unique name, `{prefix}-{version}-{timestamp}`
pub fn versioned_name(prefix: &str, version: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}-{}",
        stable_name_for(prefix, version),
        at.format(TIMESTAMP_FORMAT)
    )
}

/// Version token of a stable name, e.g. `v1.11.5` for `talos-scaleway-v1.11.5`
pub fn version_token(stable_name: &str) -> &str {
    stable_name
        .rsplit_once('-')
        .map_or(stable_name, |(_, version)| version)
}

/// Relay object key for a versioned-unique image name
///
/// Deterministic so a re-run overwrites the previous export.
pub fn relay_key(versioned_name: &str) -> String {
    format!("{versioned_name}.{RELAY_KEY_EXTENSION}")
}
