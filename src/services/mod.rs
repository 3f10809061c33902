//! Worker services: module registry, group execution, security cache,
//! configuration properties and the outbound message queue.

pub mod backoff;
pub mod config_properties;
pub mod group_executor;
pub mod module_registry;
pub mod outbound;
pub mod security_cache;
pub mod synthetic;

pub use backoff::AdaptiveBackoff;
pub use config_properties::ConfigPropertyLoader;
pub use group_executor::GroupExecutor;
pub use module_registry::{LoadOutcome, LoadedModule, ModuleRegistry, ModuleStatus, ResolvedApplication};
pub use outbound::OutboundQueue;
pub use security_cache::SecurityCache;
pub use synthetic::SyntheticExecution;
