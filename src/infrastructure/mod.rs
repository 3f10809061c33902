//! Infrastructure layer module
//!
//! Adapters for everything outside the process boundary:
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)
//! - Coordinator HTTP client and request signing
//! - Control channel to the coordinator
//! - Plugin runtimes (in-process and child process)
//!
//! Infrastructure implementations satisfy the port traits defined in the domain layer.

pub mod config;
pub mod control_channel;
pub mod coordinator;
pub mod logging;
pub mod plugins;
