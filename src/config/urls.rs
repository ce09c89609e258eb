//! Service base URLs

/// Talos image factory
pub const IMAGE_FACTORY: &str = "https://factory.talos.dev";

/// Scaleway public API
pub const SCALEWAY_API: &str = "https://api.scaleway.com";
