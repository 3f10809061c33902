//! Child-process plugin runtime.
//!
//! Each started module version runs as one child process started in the
//! module's working directory. Requests and answers travel as
//! newline-delimited JSON over the child's stdin/stdout and are matched by a
//! numeric id, so several groups may share one process. The child may ask
//! security questions or load module configuration for an in-flight
//! request; the worker answers them from the request's services.

use std::collections::{HashMap, VecDeque};
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, error, info, warn};

use crate::domain::errors::{ChannelError, ModuleLoadError, PluginError};
use crate::domain::models::{Record, SecurityQuery, GLOBAL_COMPONENT};
use crate::domain::ports::{
    ConfigProperties, Invocation, PluginOutput, PluginRuntime, RuntimeExit, SecurityService,
};
use crate::infrastructure::control_channel::PendingRequests;

const MAX_LINE: usize = 16 * 1024 * 1024;
const STDERR_TAIL_LINES: usize = 20;

type SharedStdin = Arc<tokio::sync::Mutex<Option<ChildStdin>>>;
type Replies = Arc<PendingRequests<u64, Result<PluginOutput, PluginError>>>;
type Services = Arc<Mutex<HashMap<u64, RequestServices>>>;

/// Services an in-flight request lends to the child.
#[derive(Clone, Default)]
struct RequestServices {
    security: Option<Arc<dyn SecurityService>>,
    config: Option<Arc<dyn ConfigProperties>>,
}

/// Worker to child: run one request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteRequest<'a> {
    id: u64,
    #[serde(rename = "type")]
    kind: &'static str,
    application: &'a str,
    parameters: &'a Record,
    test_mode: bool,
    log_level: &'a str,
    security_available: bool,
    config_available: bool,
}

/// Worker to child: answer to a security question.
#[derive(Debug, Serialize)]
struct SecurityAnswer {
    id: u64,
    #[serde(rename = "type")]
    kind: &'static str,
    value: Value,
}

/// Worker to child: configuration properties of a component.
#[derive(Debug, Serialize)]
struct ConfigAnswer {
    id: u64,
    #[serde(rename = "type")]
    kind: &'static str,
    properties: Record,
}

fn global_component() -> String {
    GLOBAL_COMPONENT.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
enum ErrorKind {
    BadInputData,
    Recoverable,
    Processing,
}

/// Child to worker.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ChildMessage {
    #[serde(rename_all = "camelCase")]
    Result {
        id: u64,
        #[serde(default)]
        results: Vec<Record>,
        #[serde(default)]
        customization_properties: Record,
    },
    Error {
        id: u64,
        kind: ErrorKind,
        #[serde(default)]
        message: String,
        #[serde(default)]
        trace: Option<String>,
    },
    SecurityQuery {
        id: u64,
        query: SecurityQuery,
    },
    #[serde(rename_all = "camelCase")]
    ConfigQuery {
        id: u64,
        #[serde(default = "global_component")]
        component_name: String,
    },
}

impl ChildMessage {
    fn into_reply(self) -> Option<(u64, Result<PluginOutput, PluginError>)> {
        match self {
            Self::Result {
                id,
                results,
                customization_properties,
            } => Some((
                id,
                Ok(PluginOutput {
                    results,
                    customization_properties,
                }),
            )),
            Self::Error {
                id,
                kind,
                message,
                trace,
            } => {
                let err = match kind {
                    ErrorKind::BadInputData => PluginError::BadInputData(message),
                    ErrorKind::Recoverable => PluginError::Recoverable { message, trace },
                    ErrorKind::Processing => PluginError::Processing { message, trace },
                };
                Some((id, Err(err)))
            }
            Self::SecurityQuery { .. } | Self::ConfigQuery { .. } => None,
        }
    }
}

/// Resolve a manifest `command` against a module's working directory.
pub fn resolve_command(work_dir: &Path, command: &str) -> Result<PathBuf, ModuleLoadError> {
    let command = command.trim();
    if command.is_empty() {
        return Err(ModuleLoadError::Manifest("process command is empty".into()));
    }

    let path = Path::new(command);
    if path.is_absolute() {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(ModuleLoadError::Runtime(format!(
                "plugin executable {command} not found"
            )))
        };
    }

    if path.components().any(|c| {
        matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_))
    }) {
        return Err(ModuleLoadError::Manifest(format!(
            "plugin executable path is unsafe: {command}"
        )));
    }

    let local = work_dir.join(path);
    if local.is_file() {
        return Ok(local);
    }
    if path.components().count() > 1 {
        return Err(ModuleLoadError::Runtime(format!(
            "plugin executable {command} not found in {}",
            work_dir.display()
        )));
    }
    // bare program name not shipped with the module: resolved via PATH at spawn
    Ok(path.to_path_buf())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut permissions = std::fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o755);
    std::fs::set_permissions(path, permissions)
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        debug!(pid, error = %e, "failed to send SIGTERM to plugin process");
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) {
    let _ = child.start_kill();
}

async fn write_line(stdin: &SharedStdin, line: &str) -> std::io::Result<()> {
    let mut guard = stdin.lock().await;
    let Some(stdin) = guard.as_mut() else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "plugin stdin closed",
        ));
    };
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

/// Bounded waits of a plugin process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessTimeouts {
    /// Wait for the answer to one request
    pub request: Duration,
    /// Wait for the process to exit after SIGTERM before killing it
    pub shutdown_grace: Duration,
}

/// A module version running as a child process.
pub struct ProcessRuntime {
    module_name: String,
    module_time: i64,
    stdin: SharedStdin,
    child: tokio::sync::Mutex<Option<Child>>,
    replies: Replies,
    services: Services,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    request_timeout: Duration,
    shutdown_grace: Duration,
}

impl ProcessRuntime {
    /// Start `command` in `work_dir` for a module version.
    pub fn spawn(
        module_name: &str,
        module_time: i64,
        work_dir: &Path,
        command: &str,
        args: &[String],
        timeouts: ProcessTimeouts,
        exits: mpsc::UnboundedSender<RuntimeExit>,
    ) -> Result<Arc<Self>, ModuleLoadError> {
        let program = resolve_command(work_dir, command)?;
        if program.starts_with(work_dir) {
            make_executable(&program)?;
        }

        info!(
            module_name,
            module_time,
            program = %program.display(),
            "starting plugin process"
        );
        let mut child = Command::new(&program)
            .args(args)
            .current_dir(work_dir)
            .env("GROUPWORKER_MODULE_NAME", module_name)
            .env("GROUPWORKER_MODULE_TIME", module_time.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ModuleLoadError::Runtime(format!("failed to spawn {}: {e}", program.display()))
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (Some(stdin), Some(stdout), Some(stderr)) = (stdin, stdout, stderr) else {
            let _ = child.start_kill();
            return Err(ModuleLoadError::Runtime(
                "plugin process stdio was not captured".into(),
            ));
        };

        let runtime = Arc::new(Self {
            module_name: module_name.to_string(),
            module_time,
            stdin: Arc::new(tokio::sync::Mutex::new(Some(stdin))),
            child: tokio::sync::Mutex::new(Some(child)),
            replies: Arc::new(PendingRequests::new()),
            services: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            alive: Arc::new(AtomicBool::new(true)),
            stopping: Arc::new(AtomicBool::new(false)),
            request_timeout: timeouts.request,
            shutdown_grace: timeouts.shutdown_grace,
        });

        let tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stderr_task = tokio::spawn(read_stderr(
            runtime.module_name.clone(),
            stderr,
            Arc::clone(&tail),
        ));
        tokio::spawn(read_stdout(
            StdoutContext {
                module_name: runtime.module_name.clone(),
                module_time,
                stdin: Arc::clone(&runtime.stdin),
                replies: Arc::clone(&runtime.replies),
                services: Arc::clone(&runtime.services),
                alive: Arc::clone(&runtime.alive),
                stopping: Arc::clone(&runtime.stopping),
                tail,
                stderr_task,
                exits,
            },
            stdout,
        ));

        Ok(runtime)
    }

    fn forget_services(&self, id: u64) {
        self.services
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&id);
    }
}

struct StdoutContext {
    module_name: String,
    module_time: i64,
    stdin: SharedStdin,
    replies: Replies,
    services: Services,
    alive: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    tail: Arc<Mutex<VecDeque<String>>>,
    stderr_task: tokio::task::JoinHandle<()>,
    exits: mpsc::UnboundedSender<RuntimeExit>,
}

async fn read_stderr(
    module_name: String,
    stderr: tokio::process::ChildStderr,
    tail: Arc<Mutex<VecDeque<String>>>,
) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(module_name = %module_name, "plugin stderr: {line}");
        let mut tail = tail.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}

async fn read_stdout(ctx: StdoutContext, stdout: tokio::process::ChildStdout) {
    let mut lines = FramedRead::new(stdout, LinesCodec::new_with_max_length(MAX_LINE));
    while let Some(line) = lines.next().await {
        match line {
            Ok(line) if line.trim().is_empty() => {}
            Ok(line) => handle_child_line(&ctx, &line),
            Err(e) => {
                warn!(module_name = %ctx.module_name, error = %e, "unreadable plugin output");
                break;
            }
        }
    }

    ctx.alive.store(false, Ordering::Release);
    ctx.replies.fail_all(&ChannelError::Closed);

    if !ctx.stopping.load(Ordering::Acquire) {
        // let stderr drain so the diagnostics are complete
        let _ = tokio::time::timeout(Duration::from_secs(1), ctx.stderr_task).await;
        let tail = ctx
            .tail
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        let diagnostics = if tail.is_empty() {
            "plugin process exited unexpectedly".to_string()
        } else {
            format!("plugin process exited unexpectedly\n{tail}")
        };
        error!(
            module_name = %ctx.module_name,
            module_time = ctx.module_time,
            "plugin process exited unexpectedly"
        );
        let _ = ctx.exits.send(RuntimeExit {
            module_name: ctx.module_name.clone(),
            module_time: ctx.module_time,
            diagnostics,
        });
    }
}

fn handle_child_line(ctx: &StdoutContext, line: &str) {
    let message: ChildMessage = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(e) => {
            warn!(module_name = %ctx.module_name, error = %e, "ignoring invalid plugin message");
            return;
        }
    };

    let services = |id: u64| {
        ctx.services
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&id)
            .cloned()
            .unwrap_or_default()
    };

    let message = match message {
        ChildMessage::SecurityQuery { id, query } => {
            let service = services(id).security;
            let stdin = Arc::clone(&ctx.stdin);
            tokio::spawn(async move {
                let value = match service {
                    Some(service) => service.query(query).await,
                    None => query.deny_value(),
                };
                let answer = SecurityAnswer {
                    id,
                    kind: "securityResult",
                    value,
                };
                if let Ok(line) = serde_json::to_string(&answer) {
                    if let Err(e) = write_line(&stdin, &line).await {
                        debug!(error = %e, "failed to answer plugin security query");
                    }
                }
            });
            return;
        }
        ChildMessage::ConfigQuery { id, component_name } => {
            let config = services(id).config;
            let stdin = Arc::clone(&ctx.stdin);
            tokio::spawn(async move {
                let properties = match config {
                    Some(config) => config.properties(&component_name).await,
                    None => Record::new(),
                };
                let answer = ConfigAnswer {
                    id,
                    kind: "configResult",
                    properties,
                };
                if let Ok(line) = serde_json::to_string(&answer) {
                    if let Err(e) = write_line(&stdin, &line).await {
                        debug!(error = %e, "failed to answer plugin config query");
                    }
                }
            });
            return;
        }
        other => other,
    };

    if let Some((id, reply)) = message.into_reply() {
        if !ctx.replies.resolve(&id, Ok(reply)) {
            debug!(module_name = %ctx.module_name, id, "reply for unknown or expired request");
        }
    }
}

#[async_trait]
impl PluginRuntime for ProcessRuntime {
    async fn invoke(&self, invocation: Invocation) -> Result<PluginOutput, PluginError> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(PluginError::Unavailable(format!(
                "plugin process for {} is not running",
                self.module_name
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = ExecuteRequest {
            id,
            kind: "execute",
            application: &invocation.application,
            parameters: &invocation.parameters,
            test_mode: invocation.test_mode,
            log_level: &invocation.log_level,
            security_available: invocation.security.is_some(),
            config_available: invocation.config.is_some(),
        };
        let line = serde_json::to_string(&request)
            .map_err(|e| PluginError::processing(format!("unable to encode request: {e}")))?;

        if invocation.security.is_some() || invocation.config.is_some() {
            self.services
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .insert(
                    id,
                    RequestServices {
                        security: invocation.security,
                        config: invocation.config,
                    },
                );
        }
        let rx = self.replies.register(id);
        if let Err(e) = write_line(&self.stdin, &line).await {
            self.replies.remove(&id);
            self.forget_services(id);
            return Err(PluginError::Unavailable(e.to_string()));
        }

        let outcome = self.replies.wait(&id, rx, self.request_timeout).await;
        self.forget_services(id);
        match outcome {
            Ok(result) => result,
            Err(ChannelError::Timeout(after)) => Err(PluginError::Timeout(after)),
            Err(_) => Err(PluginError::Unavailable(format!(
                "plugin process for {} exited",
                self.module_name
            ))),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    async fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::AcqRel) {
            return;
        }
        self.alive.store(false, Ordering::Release);
        // closing stdin lets a well-behaved plugin exit on its own
        self.stdin.lock().await.take();

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            send_terminate(&mut child);
            match tokio::time::timeout(self.shutdown_grace, child.wait()).await {
                Ok(Ok(status)) => {
                    info!(module_name = %self.module_name, module_time = self.module_time, ?status, "plugin process exited");
                }
                Ok(Err(e)) => {
                    error!(module_name = %self.module_name, error = ?e, "error waiting for plugin process to exit");
                }
                Err(_) => {
                    warn!(module_name = %self.module_name, "plugin process shutdown timeout, forcing kill");
                    let _ = child.kill().await;
                }
            }
        }
        self.replies.fail_all(&ChannelError::Closed);
    }
}

impl Drop for ProcessRuntime {
    fn drop(&mut self) {
        if let Ok(mut child) = self.child.try_lock() {
            if let Some(child) = child.as_mut() {
                let _ = child.start_kill();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_child_result() {
        let message: ChildMessage = serde_json::from_value(json!({
            "id": 4,
            "type": "result",
            "results": [{"label": "a"}],
            "customizationProperties": {"color": "red"}
        }))
        .unwrap();
        let (id, reply) = message.into_reply().unwrap();
        assert_eq!(id, 4);
        let output = reply.unwrap();
        assert_eq!(output.results.len(), 1);
        assert_eq!(output.customization_properties["color"], json!("red"));
    }

    #[test]
    fn test_parse_child_error_kinds() {
        let message: ChildMessage = serde_json::from_value(json!({
            "id": 1,
            "type": "error",
            "kind": "badInputData",
            "message": "x out of range"
        }))
        .unwrap();
        let (_, reply) = message.into_reply().unwrap();
        assert_eq!(reply, Err(PluginError::BadInputData("x out of range".into())));

        let message: ChildMessage = serde_json::from_value(json!({
            "id": 2,
            "type": "error",
            "kind": "recoverable",
            "message": "busy",
            "trace": "at line 3"
        }))
        .unwrap();
        let (_, reply) = message.into_reply().unwrap();
        assert!(matches!(reply, Err(PluginError::Recoverable { trace: Some(_), .. })));
    }

    #[test]
    fn test_execute_request_wire_form() {
        let params = json!({"x": 1}).as_object().cloned().unwrap();
        let request = ExecuteRequest {
            id: 9,
            kind: "execute",
            application: "point",
            parameters: &params,
            test_mode: false,
            log_level: "error",
            security_available: true,
            config_available: false,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "execute");
        assert_eq!(value["testMode"], false);
        assert_eq!(value["securityAvailable"], true);
        assert_eq!(value["configAvailable"], false);
        assert_eq!(value["logLevel"], "error");
    }

    #[test]
    fn test_resolve_command() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("plugin.sh"), "#!/bin/sh\n").unwrap();

        assert_eq!(
            resolve_command(dir.path(), "plugin.sh").unwrap(),
            dir.path().join("plugin.sh")
        );
        assert_eq!(resolve_command(dir.path(), "sh").unwrap(), PathBuf::from("sh"));
        assert!(matches!(
            resolve_command(dir.path(), "../escape.sh"),
            Err(ModuleLoadError::Manifest(_))
        ));
        assert!(matches!(
            resolve_command(dir.path(), "bin/missing"),
            Err(ModuleLoadError::Runtime(_))
        ));
        assert!(resolve_command(dir.path(), " ").is_err());
    }

    #[cfg(unix)]
    fn echo_script(dir: &Path) {
        // answers every execute with one result echoing the request id
        let script = r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed 's/.*"id":\([0-9]*\).*/\1/')
  printf '{"id":%s,"type":"result","results":[{"echo":%s}]}\n' "$id" "$id"
done
"#;
        std::fs::write(dir.join("echo.sh"), script).unwrap();
    }

    #[cfg(unix)]
    fn timeouts() -> ProcessTimeouts {
        ProcessTimeouts {
            request: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(2),
        }
    }

    #[cfg(unix)]
    fn invocation() -> Invocation {
        Invocation {
            application: "point".into(),
            parameters: Record::new(),
            test_mode: false,
            log_level: "error".into(),
            security: None,
            config: None,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_round_trip_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        echo_script(dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let runtime = ProcessRuntime::spawn(
            "geo",
            100,
            dir.path(),
            "sh",
            &["echo.sh".to_string()],
            timeouts(),
            tx,
        )
        .unwrap();

        let output = runtime.invoke(invocation()).await.unwrap();
        assert_eq!(output.results.len(), 1);
        assert_eq!(output.results[0]["echo"], json!(1));

        runtime.shutdown().await;
        assert!(!runtime.is_alive());
        assert!(matches!(
            runtime.invoke(invocation()).await,
            Err(PluginError::Unavailable(_))
        ));
        // deliberate shutdown is not reported as an unexpected exit
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unexpected_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let runtime = ProcessRuntime::spawn(
            "geo",
            100,
            dir.path(),
            "sh",
            &["-c".to_string(), "echo boom >&2; exit 3".to_string()],
            timeouts(),
            tx,
        )
        .unwrap();

        let exit = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit.module_name, "geo");
        assert_eq!(exit.module_time, 100);
        assert!(exit.diagnostics.contains("exited unexpectedly"));
        assert!(!runtime.is_alive());
    }

    #[cfg(unix)]
    struct StaticConfig;

    #[cfg(unix)]
    #[async_trait]
    impl ConfigProperties for StaticConfig {
        fn module_name(&self) -> &str {
            "geo"
        }

        async fn properties(&self, component_name: &str) -> Record {
            json!({"component": component_name, "maxRows": 25})
                .as_object()
                .cloned()
                .unwrap()
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_config_query_is_answered_on_the_pipe() {
        // asks for its configuration, then returns the answer line as its result
        let script = r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed 's/.*"id":\([0-9]*\).*/\1/')
  printf '{"id":%s,"type":"configQuery","componentName":"Geocoder"}\n' "$id"
  IFS= read -r answer
  printf '{"id":%s,"type":"result","results":[{"answer":%s}]}\n' "$id" "$answer"
done
"#;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.sh"), script).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let runtime = ProcessRuntime::spawn(
            "geo",
            100,
            dir.path(),
            "sh",
            &["config.sh".to_string()],
            timeouts(),
            tx,
        )
        .unwrap();

        let mut with_config = invocation();
        with_config.config = Some(Arc::new(StaticConfig));
        let output = runtime.invoke(with_config).await.unwrap();
        let answer = &output.results[0]["answer"];
        assert_eq!(answer["type"], json!("configResult"));
        assert_eq!(answer["id"], json!(1));
        assert_eq!(answer["properties"], json!({"component": "Geocoder", "maxRows": 25}));

        let output = runtime.invoke(invocation()).await.unwrap();
        assert_eq!(output.results[0]["answer"]["properties"], json!({}));

        runtime.shutdown().await;
    }
}
