//! Infrastructure layer
//!
//! Handles all I/O operations: network, filesystem and block devices.
//! This module is the only place where side effects occur.

pub mod cloud;
pub mod decompress;
pub mod device;
pub mod dirs;
pub mod download;
pub mod factory;
pub mod memory;
pub mod scaleway;
