//! Control messages exchanged between the worker and the coordinator.
//!
//! Every message is a JSON object tagged by `type`. Inbound instructions
//! (module start/stop, cancellation, security invalidation, pushed group
//! assignments) and outbound status reports share one enum so both transport
//! bindings can carry them unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::config_property::ConfigPropertyRecord;
use super::group::GroupAssignment;

/// A security question asked on behalf of a (module, user) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SecurityQuery {
    /// May the user perform a named action?
    #[serde(rename_all = "camelCase")]
    Action {
        /// Action name
        action_name: String,
    },
    /// Is the user a member of a group?
    #[serde(rename_all = "camelCase")]
    Group {
        /// Group name
        group_name: String,
    },
    /// May the user perform an action on a specific resource?
    #[serde(rename_all = "camelCase")]
    Resource {
        /// Resource class
        resource_class: String,
        /// Resource id
        resource_id: String,
        /// Action name
        action_name: String,
    },
    /// Generic attributes of the user
    Attributes,
}

impl SecurityQuery {
    /// Value used when the answer is unknown: deny for permissions,
    /// an empty map for attributes.
    pub fn deny_value(&self) -> Value {
        match self {
            Self::Attributes => Value::Object(serde_json::Map::new()),
            _ => Value::Bool(false),
        }
    }
}

/// A control message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlMessage {
    // ---- inbound instructions ----
    /// Load (or replace) a module version
    #[serde(rename_all = "camelCase")]
    ModuleStart {
        /// Module name
        module_name: String,
        /// Version timestamp
        module_time: i64,
        /// Number of code bundles advertised
        #[serde(default, alias = "moduleJarCount")]
        bundle_count: usize,
    },
    /// Unload a module
    #[serde(rename_all = "camelCase")]
    ModuleStop {
        /// Module name
        module_name: String,
        /// Version timestamp, when known
        #[serde(default, skip_serializing_if = "Option::is_none")]
        module_time: Option<i64>,
    },
    /// Permissions for a module changed; cached answers must be dropped
    #[serde(rename_all = "camelCase")]
    SecurityChanged {
        /// Module name
        module_name: String,
    },
    /// Abandon an executing group
    #[serde(rename_all = "camelCase")]
    CancelGroup {
        /// Group id
        group_id: String,
    },
    /// A group pushed to this worker over the control channel
    GroupAssigned(GroupAssignment),
    /// Answer to a [`ControlMessage::SecurityQuery`]
    #[serde(rename_all = "camelCase")]
    SecurityResult {
        /// Correlation id of the query being answered
        correlation_id: String,
        /// Answer value
        #[serde(default)]
        value: Value,
        /// Set when the coordinator could not answer
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Answer to a module configuration load
    #[serde(rename_all = "camelCase")]
    ModuleConfigResult {
        /// Correlation id of the load being answered
        correlation_id: String,
        /// Property rows
        #[serde(default)]
        properties: Vec<ConfigPropertyRecord>,
        /// Set when the coordinator could not answer
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    // ---- outbound requests and reports ----
    /// Ask the coordinator for a module's configuration properties
    #[serde(rename_all = "camelCase")]
    ModuleConfigLoad {
        /// Fresh correlation id
        correlation_id: String,
        /// Module name
        module_name: String,
        /// Environment the worker runs in
        environment_name: String,
        /// Component within the module
        component_name: String,
    },
    /// Ask the coordinator a security question
    #[serde(rename_all = "camelCase")]
    SecurityQuery {
        /// Fresh correlation id
        correlation_id: String,
        /// Module the question is scoped to
        module_name: String,
        /// User (consumer key)
        #[serde(rename = "consumerKey")]
        user_id: String,
        /// The question
        query: SecurityQuery,
    },
    /// A group was abandoned and should be reassigned
    #[serde(rename_all = "camelCase")]
    FailedGroupId {
        /// Group id
        group_id: String,
    },
    /// Heartbeat listing every group executing on this worker
    #[serde(rename_all = "camelCase")]
    ExecutingGroupIds {
        /// Worker id
        worker_id: String,
        /// Executing group ids
        executing_group_ids: Vec<String>,
    },
    /// A module version finished loading
    #[serde(rename_all = "camelCase")]
    ModuleStarted {
        /// Module name
        module_name: String,
        /// Version timestamp
        module_time: i64,
    },
    /// A module version failed to load
    #[serde(rename_all = "camelCase")]
    ModuleStartFailed {
        /// Module name
        module_name: String,
        /// Version timestamp
        module_time: i64,
        /// Captured diagnostics
        module_error: String,
    },
    /// A module version was unloaded
    #[serde(rename_all = "camelCase")]
    ModuleStopped {
        /// Module name
        module_name: String,
        /// Version timestamp
        module_time: i64,
    },
    /// A started module's execution context died and it was removed
    #[serde(rename_all = "camelCase")]
    ModuleExcluded {
        /// Module name
        module_name: String,
        /// Version timestamp
        module_time: i64,
        /// Captured diagnostics
        module_error: String,
    },
    /// A module is not permitted on this worker
    #[serde(rename_all = "camelCase")]
    ModuleDisabled {
        /// Module name
        module_name: String,
        /// Version timestamp
        module_time: i64,
    },
}

impl ControlMessage {
    /// The `type` tag of this message.
    pub const fn message_type(&self) -> &'static str {
        match self {
            Self::ModuleStart { .. } => "moduleStart",
            Self::ModuleStop { .. } => "moduleStop",
            Self::SecurityChanged { .. } => "securityChanged",
            Self::CancelGroup { .. } => "cancelGroup",
            Self::GroupAssigned(_) => "groupAssigned",
            Self::SecurityResult { .. } => "securityResult",
            Self::SecurityQuery { .. } => "securityQuery",
            Self::ModuleConfigResult { .. } => "moduleConfigResult",
            Self::ModuleConfigLoad { .. } => "moduleConfigLoad",
            Self::FailedGroupId { .. } => "failedGroupId",
            Self::ExecutingGroupIds { .. } => "executingGroupIds",
            Self::ModuleStarted { .. } => "moduleStarted",
            Self::ModuleStartFailed { .. } => "moduleStartFailed",
            Self::ModuleStopped { .. } => "moduleStopped",
            Self::ModuleExcluded { .. } => "moduleExcluded",
            Self::ModuleDisabled { .. } => "moduleDisabled",
        }
    }

    /// Correlation id carried by round-trip messages.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::SecurityQuery { correlation_id, .. }
            | Self::SecurityResult { correlation_id, .. }
            | Self::ModuleConfigLoad { correlation_id, .. }
            | Self::ModuleConfigResult { correlation_id, .. } => Some(correlation_id),
            _ => None,
        }
    }
}
