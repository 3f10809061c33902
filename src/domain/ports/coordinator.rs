//! Coordinator port - the dispatch abstraction shared by the HTTP pull binding
//! and the pushed-work binding.

use std::path::Path;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::domain::errors::CoordinatorError;
use crate::domain::models::{ControlMessage, GroupAssignment, GroupReport, RequestError, RequestRecord};

/// Parameters of a "next work" call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkRequest {
    /// Epoch milliseconds when this worker started
    pub worker_start_time: i64,
    /// Highest piggy-backed control message id already processed
    pub max_message_id: i64,
    /// Names of modules currently started on this worker
    pub module_names: Vec<String>,
}

/// The unit of work handed out by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum NextWork {
    /// Nothing to do right now
    NoWork,
    /// Load a module version before work for it can be assigned
    ModuleStart {
        module_name: String,
        module_time: i64,
        bundle_count: usize,
    },
    /// Execute a group
    Group(GroupAssignment),
}

/// Response to a "next work" call.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkResponse {
    /// The assigned work
    pub work: NextWork,
    /// Numbered control messages piggy-backed on the response
    pub messages: Vec<(i64, ControlMessage)>,
}

impl WorkResponse {
    /// A response carrying no work and no messages.
    pub const fn empty() -> Self {
        Self {
            work: NextWork::NoWork,
            messages: Vec::new(),
        }
    }
}

/// Stream of a group's per-request parameter records.
pub type RequestStream = BoxStream<'static, Result<RequestRecord, CoordinatorError>>;

/// Calls the worker makes against the coordinator.
#[async_trait]
pub trait CoordinatorClient: Send + Sync {
    /// Ask for the next unit of work.
    async fn next_work(&self, request: &WorkRequest) -> Result<WorkResponse, CoordinatorError>;

    /// Stream the group's per-request parameter records, in order.
    async fn group_requests(
        &self,
        assignment: &GroupAssignment,
    ) -> Result<RequestStream, CoordinatorError>;

    /// Upload the group's result records (NDJSON, read from `results`) with
    /// the group summary.
    async fn submit_results(
        &self,
        assignment: &GroupAssignment,
        report: &GroupReport,
        results: tokio::fs::File,
    ) -> Result<(), CoordinatorError>;

    /// Upload the group's per-request errors.
    async fn submit_errors(
        &self,
        assignment: &GroupAssignment,
        errors: &[RequestError],
    ) -> Result<(), CoordinatorError>;

    /// Deliver an outbound control message; `Ok` means acknowledged.
    async fn send_message(&self, message: &ControlMessage) -> Result<(), CoordinatorError>;

    /// Ordered list of bundle locations for a module version.
    async fn module_bundles(
        &self,
        module_name: &str,
        module_time: i64,
    ) -> Result<Vec<String>, CoordinatorError>;

    /// Download one bundle to `dest`.
    async fn download_bundle(&self, location: &str, dest: &Path) -> Result<(), CoordinatorError>;

    /// Signed URL a per-request-input plugin reads its input from.
    fn input_data_url(&self, assignment: &GroupAssignment, sequence_number: u64) -> String;
}
