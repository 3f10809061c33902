//! groupworker - distributed batch worker
//!
//! A worker process that pulls (or is pushed) batch job request groups from a
//! coordinator, executes them through hot-loaded, versioned business-logic
//! modules and reports per-request results and errors back.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Models, errors and port traits
//! - **Application Layer** (`application`): Scheduling loop and worker wiring
//! - **Service Layer** (`services`): Module registry, group execution, security cache
//! - **Infrastructure Layer** (`infrastructure`): HTTP client, control channel, plugin runtimes
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use groupworker::{ConfigLoader, Worker};
//! use groupworker::infrastructure::plugins::BuiltinPlugins;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::load()?;
//!     let worker = Worker::build(&config, BuiltinPlugins::new())?;
//!     worker.run(groupworker::application::install_shutdown_handler()).await
//! }
//! ```

pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{ExecutingGroups, Worker, WorkerScheduler};
pub use domain::models::{
    Config, ControlMessage, GroupAssignment, LoggingConfig, ModuleManifest, RangeSet,
};
pub use domain::ports::{BusinessPlugin, CoordinatorClient, PluginRuntime, SecurityService};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{GroupExecutor, ModuleRegistry, SecurityCache};
