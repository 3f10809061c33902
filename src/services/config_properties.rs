//! Module configuration properties loaded from the coordinator on demand.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::domain::models::config_property::convert_properties;
use crate::domain::models::Record;
use crate::domain::ports::{ConfigBackend, ConfigProperties};

/// Loads typed configuration properties for the worker's environment.
///
/// Every load is one round trip; an unreachable coordinator or a failed load
/// yields an empty map.
pub struct ConfigPropertyLoader {
    backend: Arc<dyn ConfigBackend>,
    environment_name: String,
}

impl std::fmt::Debug for ConfigPropertyLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigPropertyLoader")
            .field("environment_name", &self.environment_name)
            .field("connected", &self.backend.is_connected())
            .finish()
    }
}

impl ConfigPropertyLoader {
    /// Loader asking `backend` for the properties of `environment_name`.
    pub fn new(backend: Arc<dyn ConfigBackend>, environment_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            environment_name: environment_name.into(),
        })
    }

    /// Typed properties of one module component.
    pub async fn load(&self, module_name: &str, component_name: &str) -> Record {
        if !self.backend.is_connected() {
            debug!(module_name, component_name, "control channel down, no config properties");
            return Record::new();
        }
        match self
            .backend
            .module_config(&self.environment_name, module_name, component_name)
            .await
        {
            Ok(rows) => {
                let properties = convert_properties(&rows);
                debug!(
                    module_name,
                    component_name,
                    properties = properties.len(),
                    "config properties loaded"
                );
                properties
            }
            Err(e) => {
                warn!(module_name, component_name, error = %e, "unable to load config properties");
                Record::new()
            }
        }
    }

    /// Properties handle scoped to `module_name`.
    pub fn for_module(self: &Arc<Self>, module_name: &str) -> Arc<dyn ConfigProperties> {
        Arc::new(ModuleConfig {
            loader: Arc::clone(self),
            module_name: module_name.to_string(),
        })
    }
}

struct ModuleConfig {
    loader: Arc<ConfigPropertyLoader>,
    module_name: String,
}

#[async_trait]
impl ConfigProperties for ModuleConfig {
    fn module_name(&self) -> &str {
        &self.module_name
    }

    async fn properties(&self, component_name: &str) -> Record {
        self.loader.load(&self.module_name, component_name).await
    }
}
