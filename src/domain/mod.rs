//! Domain layer for the group worker
//!
//! Core models, errors and the port traits infrastructure adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{ChannelError, CoordinatorError, ModuleLoadError, PluginError};
