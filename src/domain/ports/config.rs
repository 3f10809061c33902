//! Configuration ports - module configuration properties for plugins and the
//! transport that loads them.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::ChannelError;
use crate::domain::models::{ConfigPropertyRecord, Record, GLOBAL_COMPONENT};

/// Round-trip transport for configuration loads.
#[async_trait]
pub trait ConfigBackend: Send + Sync {
    /// Whether a load issued now could be answered.
    fn is_connected(&self) -> bool;

    /// Fetch the property rows of one module component.
    async fn module_config(
        &self,
        environment_name: &str,
        module_name: &str,
        component_name: &str,
    ) -> Result<Vec<ConfigPropertyRecord>, ChannelError>;
}

/// Configuration properties of one module.
///
/// Loads never fail: an unreachable coordinator yields no properties.
#[async_trait]
pub trait ConfigProperties: Send + Sync {
    /// Module the properties belong to.
    fn module_name(&self) -> &str;

    /// Typed properties of a component.
    async fn properties(&self, component_name: &str) -> Record;

    /// One module-wide property.
    async fn property(&self, name: &str) -> Option<Value> {
        self.properties(GLOBAL_COMPONENT)
            .await
            .remove(name)
            .filter(|value| !value.is_null())
    }
}
