//! Core business logic module
//!
//! Stage logic for building, publishing and distributing images. Provider and
//! network access goes through the capabilities in [`crate::infra`].
//!
//! # Submodules
//!
//! - [`model`] - Zones, snapshots, images and relay objects
//! - [`naming`] - Versioned-unique and stable image names
//! - [`poll`] - Bounded waits on provider operations
//! - [`build`] - Resolve, fetch, decompress and write an image
//! - [`publish`] - Snapshot a written volume into a named image
//! - [`distribute`] - Relay export and per-zone import
//! - [`reconcile`] - Stable alias convergence and cleanup
//! - [`pipeline`] - End-to-end distribution run
//! - [`manifest`] - Build manifest parsing
//! - [`global_config`] - Global configuration management

pub mod build;
pub mod distribute;
pub mod global_config;
pub mod manifest;
pub mod model;
pub mod naming;
pub mod pipeline;
pub mod poll;
pub mod publish;
pub mod reconcile;
