//! imgrelay - Talos image builder and multi-zone distributor
//!
//! Builds a Talos Linux disk image from an Image Factory schematic, publishes
//! it as a cloud image in one zone, and replicates it to further zones
//! through an object-storage relay, keeping a stable alias name per zone.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Stage logic
//! - [`infra`] - Infrastructure layer (network, filesystem, devices, cloud API)
//! - [`config`] - Configuration and constants
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;
