//! Port trait definitions (Hexagonal Architecture)
//!
//! - `CoordinatorClient`: every call the worker makes against the coordinator
//! - `PluginLauncher` / `PluginRuntime`: per-module execution contexts
//! - `BusinessPlugin`: business logic compiled into the worker
//! - `SecurityService` / `SecurityBackend`: permission lookups and their transport
//! - `ConfigProperties` / `ConfigBackend`: module configuration and its transport

pub mod config;
pub mod coordinator;
pub mod plugin;
pub mod security;

pub use config::{ConfigBackend, ConfigProperties};
pub use coordinator::{CoordinatorClient, NextWork, RequestStream, WorkRequest, WorkResponse};
pub use plugin::{
    BusinessPlugin, Invocation, PluginLauncher, PluginOutput, PluginRuntime, RuntimeExit,
};
pub use security::{SecurityBackend, SecurityService};
