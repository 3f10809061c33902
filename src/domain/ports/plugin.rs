//! Plugin ports - how business logic hosted by a module is invoked.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::config::ConfigProperties;
use super::security::SecurityService;
use crate::domain::errors::{ModuleLoadError, PluginError};
use crate::domain::models::{ModuleManifest, Record};

/// One request handed to plugin logic.
#[derive(Clone)]
pub struct Invocation {
    /// Business application name
    pub application: String,
    /// Merged, converted request parameters
    pub parameters: Record,
    /// Whether the request runs in test mode
    pub test_mode: bool,
    /// Group log level
    pub log_level: String,
    /// Security service, when the application requires one
    pub security: Option<Arc<dyn SecurityService>>,
    /// Configuration properties of the module
    pub config: Option<Arc<dyn ConfigProperties>>,
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("application", &self.application)
            .field("parameters", &self.parameters)
            .field("test_mode", &self.test_mode)
            .field("log_level", &self.log_level)
            .field("security", &self.security.is_some())
            .field("config", &self.config.is_some())
            .finish()
    }
}

/// What plugin logic produced for one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginOutput {
    /// Result records (exactly one for single-result applications)
    pub results: Vec<Record>,
    /// Customization properties applied to every result
    pub customization_properties: Record,
}

impl PluginOutput {
    /// Output with a single result record.
    pub fn single(result: Record) -> Self {
        Self {
            results: vec![result],
            customization_properties: Record::new(),
        }
    }
}

/// Business logic compiled into the worker.
#[async_trait]
pub trait BusinessPlugin: Send + Sync {
    /// Run one request.
    async fn execute(&self, invocation: Invocation) -> Result<PluginOutput, PluginError>;
}

/// A running execution context for one module version.
#[async_trait]
pub trait PluginRuntime: Send + Sync {
    /// Run one request through the named application.
    async fn invoke(&self, invocation: Invocation) -> Result<PluginOutput, PluginError>;

    /// Whether the execution context is still usable.
    fn is_alive(&self) -> bool;

    /// Release the execution context.
    async fn shutdown(&self);
}

/// Notice that a module's execution context died on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeExit {
    /// Module name
    pub module_name: String,
    /// Module version
    pub module_time: i64,
    /// Captured diagnostics
    pub diagnostics: String,
}

/// Starts execution contexts for module manifests.
#[async_trait]
pub trait PluginLauncher: Send + Sync {
    /// Start the runtime declared by `manifest` in `work_dir`.
    ///
    /// If the runtime later dies without being shut down, a [`RuntimeExit`]
    /// is sent on `exits`.
    async fn launch(
        &self,
        manifest: &ModuleManifest,
        module_time: i64,
        work_dir: &Path,
        exits: mpsc::UnboundedSender<RuntimeExit>,
    ) -> Result<Arc<dyn PluginRuntime>, ModuleLoadError>;
}
