pub mod config;
pub mod config_property;
pub mod control;
pub mod group;
pub mod module;
pub mod range_set;
pub mod schema;

pub use config::{
    Config, ControlChannelConfig, CoordinatorConfig, DispatchConfig, DispatchMode, LogFormat,
    LoggingConfig, PluginsConfig, RotationPolicy, WorkerConfig,
};
pub use config_property::{ConfigPropertyRecord, GLOBAL_COMPONENT};
pub use control::{ControlMessage, SecurityQuery};
pub use group::{
    GroupAssignment, GroupFailure, GroupOutcome, GroupReport, Record, RequestError,
    RequestErrorCode, RequestRecord,
};
pub use module::{
    ApplicationSpec, InputMode, ModuleFilter, ModuleManifest, ModuleState, ResultMode,
    RuntimeSpec, MANIFEST_FILE_NAME,
};
pub use range_set::{RangeSet, RangeSetParseError};
pub use schema::{ConversionError, FieldSpec, FieldType};
