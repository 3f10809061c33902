//! Security ports - permission lookups for plugins and the transport that
//! answers them.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::ChannelError;
use crate::domain::models::{Record, SecurityQuery};

/// Round-trip transport for security queries.
#[async_trait]
pub trait SecurityBackend: Send + Sync {
    /// Whether a query issued now could be answered.
    fn is_connected(&self) -> bool;

    /// Ask the coordinator a security question for (module, user).
    async fn security_query(
        &self,
        module_name: &str,
        user_id: &str,
        query: SecurityQuery,
    ) -> Result<Value, ChannelError>;
}

/// Security lookups for one (module, user) pair.
///
/// Lookups never fail: an unknown answer is a deny (or empty attributes).
#[async_trait]
pub trait SecurityService: Send + Sync {
    /// Module the service is scoped to.
    fn module_name(&self) -> &str;

    /// User the service answers for.
    fn user_id(&self) -> &str;

    /// Answer a raw query.
    async fn query(&self, query: SecurityQuery) -> Value;

    /// May the user perform the named action?
    async fn can_perform_action(&self, action_name: &str) -> bool {
        self.query(SecurityQuery::Action {
            action_name: action_name.to_string(),
        })
        .await
            == Value::Bool(true)
    }

    /// Is the user a member of the group?
    async fn is_in_group(&self, group_name: &str) -> bool {
        self.query(SecurityQuery::Group {
            group_name: group_name.to_string(),
        })
        .await
            == Value::Bool(true)
    }

    /// May the user perform the action on the resource?
    async fn can_access_resource(
        &self,
        resource_class: &str,
        resource_id: &str,
        action_name: &str,
    ) -> bool {
        self.query(SecurityQuery::Resource {
            resource_class: resource_class.to_string(),
            resource_id: resource_id.to_string(),
            action_name: action_name.to_string(),
        })
        .await
            == Value::Bool(true)
    }

    /// Generic user attributes.
    async fn user_attributes(&self) -> Record {
        match self.query(SecurityQuery::Attributes).await {
            Value::Object(map) => map,
            _ => Record::new(),
        }
    }
}
