//! Execution groups, their requests, and per-request outcomes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::range_set::RangeSet;

/// A parameter or result record: field name to JSON value.
pub type Record = Map<String, Value>;

/// A group assignment as handed out by the coordinator.
///
/// The per-request parameter records are not part of the assignment; they
/// are streamed separately when the group starts executing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupAssignment {
    /// Execution group id
    pub group_id: String,
    /// Owning batch job id
    pub batch_job_id: i64,
    /// Business application to run the requests through
    pub business_application_name: String,
    /// Module hosting the business application
    pub module_name: String,
    /// Module version timestamp the group was planned against
    #[serde(default)]
    pub module_time: i64,
    /// Requesting user (consumer key)
    #[serde(default, alias = "consumerKey")]
    pub user_id: String,
    /// Log level for this group's application log
    #[serde(default = "default_group_log_level")]
    pub log_level: String,
    /// Job-level parameters shared by every request
    #[serde(default)]
    pub application_parameters: Record,
}

fn default_group_log_level() -> String {
    "error".to_string()
}

/// One request within a group, as streamed from the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestRecord {
    /// Sequence number, unique within the group
    pub sequence_number: u64,
    /// Request parameters (sequence number removed)
    pub parameters: Record,
}

impl RequestRecord {
    /// Field holding the sequence number in a streamed request record.
    pub const SEQUENCE_FIELD: &'static str = "i";

    /// Split a raw streamed record into its sequence number and parameters.
    ///
    /// Returns `None` if the record has no usable sequence number.
    pub fn from_raw(mut raw: Record) -> Option<Self> {
        let sequence_number = match raw.remove(Self::SEQUENCE_FIELD)? {
            Value::Number(n) => n.as_u64()?,
            Value::String(s) => s.trim().parse().ok()?,
            _ => return None,
        };
        Some(Self {
            sequence_number,
            parameters: raw,
        })
    }
}

/// Error code recorded against a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestErrorCode {
    /// A parameter value was invalid for the application
    #[serde(rename = "BAD_INPUT_DATA_VALUE")]
    BadInputDataValue,
    /// The plugin signalled a retryable condition
    #[serde(rename = "RECOVERABLE_EXCEPTION")]
    RecoverableException,
    /// Anything else that went wrong while processing the request
    #[serde(rename = "ERROR_PROCESSING_REQUEST")]
    ErrorProcessingRequest,
}

impl RequestErrorCode {
    /// Wire form of the code.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BadInputDataValue => "BAD_INPUT_DATA_VALUE",
            Self::RecoverableException => "RECOVERABLE_EXCEPTION",
            Self::ErrorProcessingRequest => "ERROR_PROCESSING_REQUEST",
        }
    }
}

impl std::fmt::Display for RequestErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-request error line in the group's error report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestError {
    /// Sequence number of the failed request
    pub sequence_number: u64,
    /// Classification of the failure
    pub error_code: RequestErrorCode,
    /// Human readable message
    pub message: String,
    /// Optional diagnostic trace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

/// Summary of a completed group, sent alongside the streamed results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupReport {
    /// Wall-clock time spent executing the group, in milliseconds
    pub group_executed_time_ms: u64,
    /// Time spent inside plugin code, in milliseconds
    pub application_executed_time_ms: u64,
    /// Requests that completed successfully
    pub completed: RangeSet,
    /// Requests that recorded an error
    pub failed: RangeSet,
    /// Number of result records written
    pub result_count: u64,
}

/// Why a group was abandoned and reported as failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupFailure {
    /// The module or business application is not available on this worker
    ApplicationUnavailable,
    /// The group was cancelled by the coordinator or by shutdown
    Cancelled,
    /// The module was stopped or superseded while the group was running
    ModuleStopped,
    /// Fetching requests or submitting results failed
    Coordinator(String),
    /// A local I/O failure (result spooling)
    Io(String),
}

impl std::fmt::Display for GroupFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApplicationUnavailable => f.write_str("business application not available"),
            Self::Cancelled => f.write_str("group cancelled"),
            Self::ModuleStopped => f.write_str("module stopped during execution"),
            Self::Coordinator(e) => write!(f, "coordinator error: {e}"),
            Self::Io(e) => write!(f, "i/o error: {e}"),
        }
    }
}

/// Final outcome of one group execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupOutcome {
    /// All requests ran (some may have recorded errors) and results were submitted
    Completed(GroupReport),
    /// The group was abandoned and reported as `failedGroupId`
    Failed(GroupFailure),
}

impl GroupOutcome {
    /// Whether the group completed (possibly with per-request errors).
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}
