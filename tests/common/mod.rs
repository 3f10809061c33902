//! Common test utilities for integration tests
//!
//! Provides a scripted in-memory coordinator, builtin test plugins and
//! helpers that wire the worker's services together around them.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use groupworker::application::{ControlRouter, ExecutingGroups, SchedulerSettings, WorkerScheduler};
use groupworker::domain::errors::{ChannelError, CoordinatorError, PluginError};
use groupworker::domain::models::{
    ConfigPropertyRecord, ControlMessage, DispatchMode, GroupAssignment, GroupReport, ModuleFilter, Record,
    RequestError, RequestRecord, SecurityQuery,
};
use groupworker::domain::ports::{
    BusinessPlugin, ConfigBackend, CoordinatorClient, Invocation, PluginOutput, RequestStream, SecurityBackend,
    WorkRequest, WorkResponse,
};
use groupworker::infrastructure::plugins::{BuiltinPlugins, ProcessTimeouts, RuntimeLauncher};
use groupworker::services::{
    ConfigPropertyLoader, GroupExecutor, ModuleRegistry, OutboundQueue, SecurityCache,
};

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Wait for a condition to be true with timeout
///
/// Polls the predicate every 10ms until it returns true or `timeout_ms`
/// elapses.
pub async fn wait_for<F>(mut predicate: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    predicate()
}

/// Build a record from a JSON object literal.
pub fn record(value: Value) -> Record {
    value.as_object().cloned().expect("record must be a JSON object")
}

/// A group assignment with default log level and no job parameters.
pub fn assignment(group_id: &str, module_name: &str, application: &str) -> GroupAssignment {
    GroupAssignment {
        group_id: group_id.to_string(),
        batch_job_id: 1,
        business_application_name: application.to_string(),
        module_name: module_name.to_string(),
        module_time: 100,
        user_id: "alice".to_string(),
        log_level: "error".to_string(),
        application_parameters: Record::new(),
    }
}

/// Manifest text of a builtin module named `name` whose entry is `name`.
///
/// `applications` is appended verbatim and should hold `[[applications]]`
/// tables.
pub fn builtin_manifest(name: &str, applications: &str) -> String {
    format!("name = \"{name}\"\n\n[runtime]\nkind = \"builtin\"\nentry = \"{name}\"\n\n{applications}")
}

/// A single single-result application with an optional required `x` field.
pub const ECHO_APPLICATION: &str = r#"
[[applications]]
name = "echo"
request_fields = [{ name = "x", type = "integer" }]
result_fields = [{ name = "x", type = "integer" }, { name = "label", type = "string" }]
"#;

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Uploaded output of one group.
#[derive(Debug, Clone)]
pub struct Submission {
    pub report: GroupReport,
    pub results: String,
}

impl Submission {
    /// Result records, one per NDJSON line.
    pub fn records(&self) -> Vec<Value> {
        self.results
            .lines()
            .map(|line| serde_json::from_str(line).expect("result line must be JSON"))
            .collect()
    }
}

/// Scripted in-memory coordinator.
#[derive(Default)]
pub struct MockCoordinator {
    responses: Mutex<VecDeque<Result<WorkResponse, CoordinatorError>>>,
    work_requests: Mutex<Vec<WorkRequest>>,
    requests: Mutex<HashMap<String, Vec<Record>>>,
    bundles: Mutex<HashMap<(String, i64), Vec<(String, Vec<u8>)>>>,
    results: Mutex<HashMap<String, Submission>>,
    errors: Mutex<HashMap<String, Vec<RequestError>>>,
    sent: Mutex<Vec<ControlMessage>>,
    send_failures: AtomicUsize,
    reject_sends: Mutex<bool>,
    pub next_work_calls: AtomicUsize,
    pub request_delay: Mutex<Duration>,
}

impl MockCoordinator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a response for the next `next_work` call. When the script is
    /// exhausted an empty response is returned.
    pub fn script(&self, response: Result<WorkResponse, CoordinatorError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// Request records served for `group_id`; each must carry `i`.
    pub fn set_requests(&self, group_id: &str, records: Vec<Value>) {
        self.requests
            .lock()
            .unwrap()
            .insert(group_id.to_string(), records.into_iter().map(record).collect());
    }

    /// Bundle files served for a module version, in order.
    pub fn set_bundles(&self, name: &str, module_time: i64, files: Vec<(&str, String)>) {
        let files = files
            .into_iter()
            .map(|(file, content)| {
                (
                    format!("/worker/modules/{name}/{module_time}/bundles/{file}"),
                    content.into_bytes(),
                )
            })
            .collect();
        self.bundles
            .lock()
            .unwrap()
            .insert((name.to_string(), module_time), files);
    }

    /// Serve a builtin manifest for a module version.
    pub fn set_manifest(&self, name: &str, module_time: i64, applications: &str) {
        self.set_bundles(
            name,
            module_time,
            vec![("module.toml", builtin_manifest(name, applications))],
        );
    }

    /// Fail the next `n` `send_message` calls with a transient error.
    pub fn fail_sends(&self, n: usize) {
        self.send_failures.store(n, Ordering::SeqCst);
    }

    /// Permanently reject every `send_message` call.
    pub fn reject_sends(&self) {
        *self.reject_sends.lock().unwrap() = true;
    }

    pub fn work_requests(&self) -> Vec<WorkRequest> {
        self.work_requests.lock().unwrap().clone()
    }

    pub fn submission(&self, group_id: &str) -> Option<Submission> {
        self.results.lock().unwrap().get(group_id).cloned()
    }

    pub fn errors(&self, group_id: &str) -> Vec<RequestError> {
        self.errors
            .lock()
            .unwrap()
            .get(group_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn submitted_groups(&self) -> usize {
        self.results.lock().unwrap().len()
    }

    pub fn sent(&self) -> Vec<ControlMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Sent messages of one `type`.
    pub fn sent_of(&self, message_type: &str) -> Vec<ControlMessage> {
        self.sent()
            .into_iter()
            .filter(|m| m.message_type() == message_type)
            .collect()
    }
}

#[async_trait]
impl CoordinatorClient for MockCoordinator {
    async fn next_work(&self, request: &WorkRequest) -> Result<WorkResponse, CoordinatorError> {
        self.next_work_calls.fetch_add(1, Ordering::SeqCst);
        self.work_requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(WorkResponse::empty()))
    }

    async fn group_requests(
        &self,
        assignment: &GroupAssignment,
    ) -> Result<RequestStream, CoordinatorError> {
        let records = self
            .requests
            .lock()
            .unwrap()
            .get(&assignment.group_id)
            .cloned()
            .ok_or_else(|| CoordinatorError::NotFound(assignment.group_id.clone()))?;
        let delay = *self.request_delay.lock().unwrap();
        let stream = futures::stream::iter(records).then(move |raw| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            RequestRecord::from_raw(raw)
                .ok_or_else(|| CoordinatorError::Decode("request without sequence".into()))
        });
        Ok(Box::pin(stream))
    }

    async fn submit_results(
        &self,
        assignment: &GroupAssignment,
        report: &GroupReport,
        mut results: tokio::fs::File,
    ) -> Result<(), CoordinatorError> {
        let mut text = String::new();
        results.read_to_string(&mut text).await?;
        self.results.lock().unwrap().insert(
            assignment.group_id.clone(),
            Submission {
                report: report.clone(),
                results: text,
            },
        );
        Ok(())
    }

    async fn submit_errors(
        &self,
        assignment: &GroupAssignment,
        errors: &[RequestError],
    ) -> Result<(), CoordinatorError> {
        self.errors
            .lock()
            .unwrap()
            .insert(assignment.group_id.clone(), errors.to_vec());
        Ok(())
    }

    async fn send_message(&self, message: &ControlMessage) -> Result<(), CoordinatorError> {
        if *self.reject_sends.lock().unwrap() {
            return Err(CoordinatorError::Status {
                status: 400,
                body: "rejected".into(),
            });
        }
        let remaining = self.send_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.send_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(CoordinatorError::Transport("connection refused".into()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn module_bundles(
        &self,
        module_name: &str,
        module_time: i64,
    ) -> Result<Vec<String>, CoordinatorError> {
        self.bundles
            .lock()
            .unwrap()
            .get(&(module_name.to_string(), module_time))
            .map(|files| files.iter().map(|(location, _)| location.clone()).collect())
            .ok_or_else(|| CoordinatorError::NotFound(format!("{module_name}/{module_time}")))
    }

    async fn download_bundle(&self, location: &str, dest: &Path) -> Result<(), CoordinatorError> {
        let content = self
            .bundles
            .lock()
            .unwrap()
            .values()
            .flatten()
            .find(|(l, _)| l == location)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| CoordinatorError::NotFound(location.to_string()))?;
        tokio::fs::write(dest, content).await?;
        Ok(())
    }

    fn input_data_url(&self, assignment: &GroupAssignment, sequence_number: u64) -> String {
        format!(
            "http://coordinator/worker/groups/{}/requests/{sequence_number}/inputData",
            assignment.group_id
        )
    }
}


// ---------------------------------------------------------------------------
// Plugins and security
// ---------------------------------------------------------------------------

/// Plugin built from a closure.
pub struct FnPlugin<F>(pub F);

#[async_trait]
impl<F> BusinessPlugin for FnPlugin<F>
where
    F: Fn(Invocation) -> Result<PluginOutput, PluginError> + Send + Sync,
{
    async fn execute(&self, invocation: Invocation) -> Result<PluginOutput, PluginError> {
        (self.0)(invocation)
    }
}

/// Echo plugin: returns `x` and a label; `x == 13` is a processing error and
/// `x == 7` panics.
pub fn echo_plugin() -> Arc<dyn BusinessPlugin> {
    Arc::new(FnPlugin(|invocation: Invocation| {
        let x = invocation.parameters.get("x").cloned().unwrap_or(Value::Null);
        match x.as_i64() {
            Some(13) => Err(PluginError::processing("unlucky")),
            Some(7) => panic!("seven"),
            _ => Ok(PluginOutput::single(record(json!({
                "x": x,
                "label": format!("value {x}"),
            })))),
        }
    }))
}

/// Plugin that blocks until `open` is cancelled, counting concurrent calls.
pub struct GatePlugin {
    pub open: CancellationToken,
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
    pub calls: AtomicUsize,
}

impl GatePlugin {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            open: CancellationToken::new(),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl BusinessPlugin for GatePlugin {
    async fn execute(&self, _invocation: Invocation) -> Result<PluginOutput, PluginError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.open.cancelled().await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(PluginOutput::single(Record::new()))
    }
}

/// Security backend that grants everything to `alice`.
pub struct AliceOnlyBackend;

#[async_trait]
impl SecurityBackend for AliceOnlyBackend {
    fn is_connected(&self) -> bool {
        true
    }

    async fn security_query(
        &self,
        _module_name: &str,
        user_id: &str,
        query: SecurityQuery,
    ) -> Result<Value, ChannelError> {
        Ok(match query {
            SecurityQuery::Attributes => json!({ "user": user_id }),
            _ => Value::Bool(user_id == "alice"),
        })
    }
}

/// Configuration backend serving fixed rows per (module, component).
#[derive(Default)]
pub struct StaticConfigBackend {
    rows: Mutex<HashMap<(String, String), Vec<ConfigPropertyRecord>>>,
}

impl StaticConfigBackend {
    pub fn set(&self, module_name: &str, component_name: &str, rows: Vec<ConfigPropertyRecord>) {
        self.rows
            .lock()
            .unwrap()
            .insert((module_name.to_string(), component_name.to_string()), rows);
    }
}

#[async_trait]
impl ConfigBackend for StaticConfigBackend {
    fn is_connected(&self) -> bool {
        true
    }

    async fn module_config(
        &self,
        _environment_name: &str,
        module_name: &str,
        component_name: &str,
    ) -> Result<Vec<ConfigPropertyRecord>, ChannelError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(&(module_name.to_string(), component_name.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// The worker's services wired around a [`MockCoordinator`].
pub struct Harness {
    pub dir: TempDir,
    pub coordinator: Arc<MockCoordinator>,
    pub outbound: Arc<OutboundQueue>,
    pub registry: Arc<ModuleRegistry>,
    pub security: Arc<SecurityCache>,
    pub config: Arc<StaticConfigBackend>,
    pub executor: Arc<GroupExecutor>,
}

impl Harness {
    pub fn new(builtins: BuiltinPlugins) -> Self {
        Self::with_filter(builtins, ModuleFilter::default())
    }

    pub fn with_filter(builtins: BuiltinPlugins, filter: ModuleFilter) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let coordinator = MockCoordinator::new();
        let client: Arc<dyn CoordinatorClient> = coordinator.clone();
        let outbound = Arc::new(OutboundQueue::new());
        let launcher = Arc::new(RuntimeLauncher::new(
            Arc::new(builtins),
            ProcessTimeouts {
                request: Duration::from_secs(10),
                shutdown_grace: Duration::from_secs(1),
            },
        ));
        let registry = ModuleRegistry::new(
            Arc::clone(&client),
            launcher,
            Arc::clone(&outbound),
            dir.path().join("modules"),
            filter,
        );
        let security = SecurityCache::new(Arc::new(AliceOnlyBackend));
        let config = Arc::new(StaticConfigBackend::default());
        let executor = Arc::new(
            GroupExecutor::new(
                client,
                Arc::clone(&registry),
                Arc::clone(&security),
                Arc::clone(&outbound),
                Some(dir.path().join("spool")),
            )
            .with_config_properties(ConfigPropertyLoader::new(config.clone(), "test")),
        );
        Self {
            dir,
            coordinator,
            outbound,
            registry,
            security,
            config,
            executor,
        }
    }

    pub fn client(&self) -> Arc<dyn CoordinatorClient> {
        self.coordinator.clone()
    }

    /// Queued outbound messages of one `type`.
    pub fn queued_of(&self, message_type: &str) -> Vec<ControlMessage> {
        self.outbound
            .snapshot()
            .into_iter()
            .filter(|m| m.message_type() == message_type)
            .collect()
    }

    /// Scheduling loop over these services.
    pub fn scheduler(&self, settings: SchedulerSettings) -> SchedulerParts {
        let groups = ExecutingGroups::new();
        let wake = Arc::new(Notify::new());
        let router = ControlRouter::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.security),
            Arc::clone(&groups),
            Arc::clone(&wake),
        );
        let scheduler = Arc::new(WorkerScheduler::new(
            settings,
            self.client(),
            Arc::clone(&self.registry),
            Arc::clone(&self.executor),
            Arc::clone(&self.outbound),
            Arc::clone(&groups),
            Arc::clone(&router),
            wake,
        ));
        SchedulerParts {
            scheduler,
            groups,
            router,
        }
    }
}

/// A scheduling loop and the components it shares with the router.
pub struct SchedulerParts {
    pub scheduler: Arc<WorkerScheduler>,
    pub groups: Arc<ExecutingGroups>,
    pub router: Arc<ControlRouter>,
}

/// Scheduler settings with short timings for tests.
pub fn fast_settings(max_concurrent_groups: usize) -> SchedulerSettings {
    SchedulerSettings {
        worker_id: "test:localhost:1".to_string(),
        worker_start_time: 1_000,
        max_concurrent_groups,
        mode: DispatchMode::Poll,
        backoff_step: Duration::from_millis(20),
        max_backoff: Duration::from_millis(100),
        heartbeat_interval: Duration::from_secs(3600),
        drain_timeout: Duration::from_secs(2),
    }
}
