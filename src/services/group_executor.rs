//! Group executor: runs one assigned execution group end to end.
//!
//! Requests run sequentially. A failing request is recorded in the error
//! range set and the group carries on; only group-level problems (module
//! gone, cancellation, coordinator errors) abandon the group, which is then
//! reported as `failedGroupId`. Result records are spooled to a temporary
//! file as they are produced and streamed to the coordinator at the end.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::config_properties::ConfigPropertyLoader;
use super::module_registry::{ModuleRegistry, ResolvedApplication};
use super::outbound::OutboundQueue;
use super::security_cache::SecurityCache;
use super::synthetic::{fill_test_values, SyntheticExecution};
use crate::domain::errors::PluginError;
use crate::domain::models::schema::convert_record;
use crate::domain::models::{
    ApplicationSpec, ControlMessage, ConversionError, GroupAssignment, GroupFailure, GroupOutcome,
    GroupReport, Record, RequestError, RequestRecord, ResultMode,
};
use crate::domain::ports::{ConfigProperties, CoordinatorClient, Invocation, PluginOutput};
use crate::infrastructure::logging::GroupLog;

/// Parameter holding the signed input URL of a per-request-input application.
pub const INPUT_DATA_URL: &str = "inputDataUrl";

const CUSTOMIZATION_PROPERTIES: &str = "customizationProperties";

/// One line of the result spool, fields in output order.
struct ResultLine<'a>(Vec<(&'a str, &'a Value)>);

impl Serialize for ResultLine<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// What went wrong with a single request.
#[derive(Debug)]
enum RequestFailure {
    Plugin(PluginError),
    Abandon(GroupFailure),
}

impl From<PluginError> for RequestFailure {
    fn from(err: PluginError) -> Self {
        Self::Plugin(err)
    }
}

impl From<ConversionError> for RequestFailure {
    fn from(err: ConversionError) -> Self {
        Self::Plugin(err.into())
    }
}

/// Executes assigned groups.
pub struct GroupExecutor {
    coordinator: Arc<dyn CoordinatorClient>,
    registry: Arc<ModuleRegistry>,
    security: Arc<SecurityCache>,
    outbound: Arc<OutboundQueue>,
    spool_dir: Option<PathBuf>,
    config: Option<Arc<ConfigPropertyLoader>>,
}

struct GroupRun<'a> {
    assignment: &'a GroupAssignment,
    resolved: ResolvedApplication,
    config: Option<Arc<dyn ConfigProperties>>,
    log: GroupLog,
    application_parameters: Result<Record, ConversionError>,
    report: GroupReport,
    errors: Vec<RequestError>,
    spool: BufWriter<tokio::fs::File>,
    application_time: Duration,
}

impl GroupExecutor {
    /// Create an executor. Result spools are created in `spool_dir`, or the
    /// system temporary directory when `None`.
    pub fn new(
        coordinator: Arc<dyn CoordinatorClient>,
        registry: Arc<ModuleRegistry>,
        security: Arc<SecurityCache>,
        outbound: Arc<OutboundQueue>,
        spool_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            coordinator,
            registry,
            security,
            outbound,
            spool_dir,
            config: None,
        }
    }

    /// Hand plugins the configuration properties of their module.
    #[must_use]
    pub fn with_config_properties(mut self, loader: Arc<ConfigPropertyLoader>) -> Self {
        self.config = Some(loader);
        self
    }

    /// Run `assignment` to completion, reporting a failed group as
    /// `failedGroupId`.
    pub async fn run(&self, assignment: GroupAssignment, cancel: CancellationToken) -> GroupOutcome {
        let span = tracing::info_span!(
            "group",
            group_id = %assignment.group_id,
            module_name = %assignment.module_name,
            module_time = assignment.module_time,
        );
        let outcome = self.execute(&assignment, &cancel).instrument(span).await;
        if let GroupOutcome::Failed(reason) = &outcome {
            warn!(group_id = %assignment.group_id, reason = %reason, "group failed");
            self.outbound.push(ControlMessage::FailedGroupId {
                group_id: assignment.group_id.clone(),
            });
        }
        outcome
    }

    async fn execute(&self, assignment: &GroupAssignment, cancel: &CancellationToken) -> GroupOutcome {
        let started = Instant::now();
        let log = GroupLog::new(
            &assignment.group_id,
            &assignment.business_application_name,
            &assignment.log_level,
        );
        log.info(&format!("Start group execution groupId={}", assignment.group_id));

        let Some(resolved) = self
            .registry
            .resolve(&assignment.module_name, &assignment.business_application_name)
        else {
            return GroupOutcome::Failed(GroupFailure::ApplicationUnavailable);
        };

        let spool = match self.create_spool().await {
            Ok(file) => file,
            Err(e) => return GroupOutcome::Failed(GroupFailure::Io(e.to_string())),
        };

        let mut application_parameters = assignment.application_parameters.clone();
        let application_parameters = if resolved.application.is_per_request_input() {
            Ok(application_parameters)
        } else {
            convert_record(
                &resolved.application.request_fields,
                &mut application_parameters,
                false,
            )
            .map(|()| application_parameters)
        };
        if let Err(e) = &application_parameters {
            log.error(&format!("Invalid job parameters: {e}"));
        }

        let config = self
            .config
            .as_ref()
            .map(|loader| loader.for_module(&assignment.module_name));
        let mut run = GroupRun {
            assignment,
            resolved,
            config,
            log,
            application_parameters,
            report: GroupReport::default(),
            errors: Vec::new(),
            spool: BufWriter::new(spool),
            application_time: Duration::ZERO,
        };

        let outcome = match self.run_requests(&mut run, cancel).await {
            Ok(()) => self.submit(run, started).await,
            Err(failure) => GroupOutcome::Failed(failure),
        };
        info!(
            completed = outcome.is_completed(),
            elapsed_ms = millis(started.elapsed()),
            "group execution finished"
        );
        outcome
    }

    async fn create_spool(&self) -> std::io::Result<tokio::fs::File> {
        let file = match &self.spool_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                let dir = dir.clone();
                tokio::task::spawn_blocking(move || tempfile::tempfile_in(dir))
                    .await
                    .map_err(std::io::Error::other)??
            }
            None => tokio::task::spawn_blocking(tempfile::tempfile)
                .await
                .map_err(std::io::Error::other)??,
        };
        Ok(tokio::fs::File::from_std(file))
    }

    fn check_live(run: &GroupRun<'_>, cancel: &CancellationToken) -> Result<(), GroupFailure> {
        if cancel.is_cancelled() {
            return Err(GroupFailure::Cancelled);
        }
        if !run.resolved.module.is_started() {
            return Err(GroupFailure::ModuleStopped);
        }
        Ok(())
    }

    async fn run_requests(
        &self,
        run: &mut GroupRun<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), GroupFailure> {
        let mut requests = self
            .coordinator
            .group_requests(run.assignment)
            .await
            .map_err(|e| GroupFailure::Coordinator(e.to_string()))?;

        while let Some(request) = requests.next().await {
            let request = request.map_err(|e| GroupFailure::Coordinator(e.to_string()))?;
            Self::check_live(run, cancel)?;
            self.run_request(run, request, cancel).await?;
        }
        Self::check_live(run, cancel)
    }

    async fn run_request(
        &self,
        run: &mut GroupRun<'_>,
        request: RequestRecord,
        cancel: &CancellationToken,
    ) -> Result<(), GroupFailure> {
        let sequence_number = request.sequence_number;
        if run.log.is_debug_enabled() {
            run.log.debug(&format!(
                "Request execution start groupId={} sequenceNumber={sequence_number}",
                run.assignment.group_id
            ));
        }

        let started = Instant::now();
        let result = self.invoke_request(run, request, cancel).await;
        run.application_time += started.elapsed();

        if run.log.is_debug_enabled() {
            run.log.debug(&format!(
                "Request execution end groupId={} sequenceNumber={sequence_number}",
                run.assignment.group_id
            ));
        }

        match result {
            Ok((output, test_mode)) => {
                let written = write_results(run, sequence_number, output, test_mode)
                    .await
                    .map_err(|e| GroupFailure::Io(e.to_string()))?;
                run.report.result_count += written;
                run.report.completed.add(sequence_number);
            }
            Err(RequestFailure::Plugin(err)) => {
                run.log.error(&format!(
                    "Error processing request {sequence_number}: {} {err}",
                    err.error_code()
                ));
                run.errors.push(RequestError {
                    sequence_number,
                    error_code: err.error_code(),
                    message: err.to_string(),
                    trace: err.trace().map(str::to_string),
                });
                run.report.failed.add(sequence_number);
            }
            Err(RequestFailure::Abandon(failure)) => return Err(failure),
        }
        Ok(())
    }

    /// Build the invocation for one request and run it.
    async fn invoke_request(
        &self,
        run: &GroupRun<'_>,
        request: RequestRecord,
        cancel: &CancellationToken,
    ) -> Result<(PluginOutput, bool), RequestFailure> {
        let application = &run.resolved.application;
        let application_parameters = run
            .application_parameters
            .as_ref()
            .map_err(|e| RequestFailure::from(e.clone()))?;

        let mut parameters = request.parameters;
        let synthetic = match SyntheticExecution::take_from(&mut parameters) {
            Ok(synthetic) => synthetic.filter(|_| application.test_mode_enabled),
            Err(e) if application.test_mode_enabled => return Err(e.into()),
            Err(_) => None,
        };

        let parameters = if application.is_per_request_input() {
            let mut merged = application_parameters.clone();
            merged.extend(parameters);
            merged.insert(
                INPUT_DATA_URL.to_string(),
                Value::String(
                    self.coordinator
                        .input_data_url(run.assignment, request.sequence_number),
                ),
            );
            merged
        } else {
            convert_record(&application.request_fields, &mut parameters, false)?;
            let mut merged = application_parameters.clone();
            merged.extend(parameters);
            check_required(application, &merged)?;
            merged
        };

        let security = if application.security_required {
            if run.assignment.user_id.is_empty() {
                return Err(PluginError::BadInputData(
                    "security service required but the request has no user".into(),
                )
                .into());
            }
            Some(
                self.security
                    .service(run.resolved.module.name(), &run.assignment.user_id),
            )
        } else {
            None
        };

        let test_mode = synthetic.is_some();
        if let Some(synthetic) = synthetic {
            let delay = synthetic.execution_time(&mut rand::thread_rng());
            debug!(delay_ms = millis(delay), "synthetic test execution");
            tokio::select! {
                () = cancel.cancelled() => {
                    return Err(RequestFailure::Abandon(GroupFailure::Cancelled));
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        let invocation = Invocation {
            application: application.name.clone(),
            parameters,
            test_mode,
            log_level: run.assignment.log_level.clone(),
            security,
            config: run.config.clone(),
        };
        let mut output = run.resolved.module.runtime().invoke(invocation).await?;

        if test_mode
            && application.result_mode == ResultMode::List
            && output.results.is_empty()
        {
            let count = synthetic.map_or(0, |s| s.result_count(&mut rand::thread_rng()));
            output.results = vec![Record::new(); count];
        }
        if application.result_mode == ResultMode::Single && output.results.len() != 1 {
            if test_mode && output.results.is_empty() {
                output.results.push(Record::new());
            } else {
                return Err(PluginError::processing(format!(
                    "application {} returned {} results, expected 1",
                    application.name,
                    output.results.len()
                ))
                .into());
            }
        }
        Ok((output, test_mode))
    }

    async fn submit(&self, mut run: GroupRun<'_>, started: Instant) -> GroupOutcome {
        if let Err(e) = run.spool.flush().await {
            return GroupOutcome::Failed(GroupFailure::Io(e.to_string()));
        }
        let mut spool = run.spool.into_inner();
        if let Err(e) = spool.rewind().await {
            return GroupOutcome::Failed(GroupFailure::Io(e.to_string()));
        }

        run.report.group_executed_time_ms = millis(started.elapsed());
        run.report.application_executed_time_ms = millis(run.application_time);

        if let Err(e) = self
            .coordinator
            .submit_results(run.assignment, &run.report, spool)
            .await
        {
            return GroupOutcome::Failed(GroupFailure::Coordinator(e.to_string()));
        }
        if !run.errors.is_empty() {
            if let Err(e) = self
                .coordinator
                .submit_errors(run.assignment, &run.errors)
                .await
            {
                return GroupOutcome::Failed(GroupFailure::Coordinator(e.to_string()));
            }
        }

        run.log.info(&format!(
            "End group execution groupId={} completed={} failed={}",
            run.assignment.group_id, run.report.completed, run.report.failed
        ));
        GroupOutcome::Completed(run.report)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn check_required(application: &ApplicationSpec, parameters: &Record) -> Result<(), ConversionError> {
    for field in application.request_fields.iter().filter(|f| f.required) {
        if parameters.get(&field.name).is_none_or(Value::is_null) {
            return Err(ConversionError::MissingRequired(field.name.clone()));
        }
    }
    Ok(())
}

/// Shape the plugin's output into result records and append them to the
/// spool. Returns the number of records written.
async fn write_results(
    run: &mut GroupRun<'_>,
    sequence_number: u64,
    output: PluginOutput,
    test_mode: bool,
) -> std::io::Result<u64> {
    let application = &run.resolved.application;
    let list = application.result_mode == ResultMode::List;
    let sequence_value = Value::from(sequence_number);
    let mut written = 0;

    for (index, mut result) in output.results.into_iter().enumerate() {
        if test_mode {
            fill_test_values(&application.result_fields, &mut result);
        }

        let mut customization = output.customization_properties.clone();
        if let Some(Value::Object(own)) = result.remove(CUSTOMIZATION_PROPERTIES) {
            customization.extend(own);
        }
        let customization = Value::Object(customization);
        let result_number = Value::from(index + 1);

        let mut fields: Vec<(&str, &Value)> = vec![("sequenceNumber", &sequence_value)];
        if list {
            fields.push(("resultNumber", &result_number));
        }
        if application.result_fields.is_empty() {
            fields.extend(result.iter().map(|(k, v)| (k.as_str(), v)));
        } else {
            for field in &application.result_fields {
                fields.push((
                    field.name.as_str(),
                    result.get(&field.name).unwrap_or(&Value::Null),
                ));
            }
        }
        if customization.as_object().is_some_and(|c| !c.is_empty()) {
            fields.push((CUSTOMIZATION_PROPERTIES, &customization));
        }

        let mut line = serde_json::to_vec(&ResultLine(fields)).map_err(std::io::Error::other)?;
        line.push(b'\n');
        run.spool.write_all(&line).await?;
        written += 1;
    }
    Ok(written)
}
