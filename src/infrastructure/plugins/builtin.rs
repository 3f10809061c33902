//! Plugins compiled into the worker.
//!
//! A module whose manifest declares `kind = "builtin"` runs inside the worker
//! process. Its applications are looked up in a [`BuiltinPlugins`] registry
//! under the manifest's entry name. A panic in plugin code is contained to the
//! request that raised it.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::warn;

use crate::domain::errors::{ModuleLoadError, PluginError};
use crate::domain::models::ModuleManifest;
use crate::domain::ports::{BusinessPlugin, Invocation, PluginOutput, PluginRuntime};

/// Registered builtin plugins, keyed by entry name then application name.
#[derive(Default, Clone)]
pub struct BuiltinPlugins {
    entries: HashMap<String, HashMap<String, Arc<dyn BusinessPlugin>>>,
}

impl std::fmt::Debug for BuiltinPlugins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries: HashMap<_, Vec<_>> = self
            .entries
            .iter()
            .map(|(entry, apps)| (entry, apps.keys().collect()))
            .collect();
        f.debug_struct("BuiltinPlugins")
            .field("entries", &entries)
            .finish()
    }
}

impl BuiltinPlugins {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `plugin` as `application` of `entry`, replacing any previous one.
    pub fn register(
        &mut self,
        entry: impl Into<String>,
        application: impl Into<String>,
        plugin: Arc<dyn BusinessPlugin>,
    ) -> &mut Self {
        self.entries
            .entry(entry.into())
            .or_default()
            .insert(application.into(), plugin);
        self
    }

    /// Whether anything is registered under `entry`.
    pub fn has_entry(&self, entry: &str) -> bool {
        self.entries.contains_key(entry)
    }

    /// Build the runtime for `manifest`; every declared application must be
    /// registered under `entry`.
    pub fn runtime_for(
        &self,
        entry: &str,
        manifest: &ModuleManifest,
    ) -> Result<BuiltinRuntime, ModuleLoadError> {
        let registered = self.entries.get(entry).ok_or_else(|| {
            ModuleLoadError::Runtime(format!("no builtin plugin registered as '{entry}'"))
        })?;

        let mut applications = HashMap::new();
        for app in &manifest.applications {
            let plugin = registered.get(&app.name).ok_or_else(|| {
                ModuleLoadError::Runtime(format!(
                    "builtin plugin '{entry}' does not provide application '{}'",
                    app.name
                ))
            })?;
            applications.insert(app.name.clone(), Arc::clone(plugin));
        }

        Ok(BuiltinRuntime {
            module_name: manifest.name.clone(),
            applications,
            alive: AtomicBool::new(true),
        })
    }
}

/// In-process runtime for one module version.
pub struct BuiltinRuntime {
    module_name: String,
    applications: HashMap<String, Arc<dyn BusinessPlugin>>,
    alive: AtomicBool,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[async_trait]
impl PluginRuntime for BuiltinRuntime {
    async fn invoke(&self, invocation: Invocation) -> Result<PluginOutput, PluginError> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(PluginError::Unavailable(format!(
                "module {} has been stopped",
                self.module_name
            )));
        }
        let plugin = self
            .applications
            .get(&invocation.application)
            .cloned()
            .ok_or_else(|| {
                PluginError::processing(format!(
                    "application {} is not provided by module {}",
                    invocation.application, self.module_name
                ))
            })?;

        match AssertUnwindSafe(plugin.execute(invocation)).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(module_name = %self.module_name, panic = %message, "builtin plugin panicked");
                Err(PluginError::Processing {
                    message: format!("plugin panicked: {message}"),
                    trace: None,
                })
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::Release);
    }
}
