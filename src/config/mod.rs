//! Configuration constants
//!
//! Compile-time defaults and service URLs. Runtime configuration lives in
//! [`crate::core::global_config`].

pub mod defaults;
pub mod urls;
