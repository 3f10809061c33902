//! Worker configuration
//!
//! Layered with figment: built-in defaults, then `.groupworker/config.yaml`
//! and `.groupworker/local.yaml`, then `GROUPWORKER_*` environment variables.
//! The merged result is checked by [`ConfigLoader::validate`].

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
