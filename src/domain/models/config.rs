use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Main configuration structure for the worker
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Worker identity and pool settings
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Coordinator connection
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// How work is obtained
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Persistent control channel
    #[serde(default)]
    pub control_channel: ControlChannelConfig,

    /// Plugin runtime settings
    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Worker identity and pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Environment name, used in the generated worker id
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Explicit worker id; generated from host, environment and port when unset
    #[serde(default)]
    pub id: Option<String>,

    /// Maximum number of groups executing at once (N)
    #[serde(default = "default_max_concurrent_groups")]
    pub max_concurrent_groups: usize,

    /// Module include/exclude list (`-name` excludes)
    #[serde(default)]
    pub module_names: Vec<String>,

    /// Root directory for module working directories; a temp dir when unset
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Seconds between unsolicited heartbeats
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

fn default_environment() -> String {
    "default".to_string()
}

const fn default_max_concurrent_groups() -> usize {
    4
}

const fn default_heartbeat_interval_secs() -> u64 {
    300
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            id: None,
            max_concurrent_groups: default_max_concurrent_groups(),
            module_names: Vec::new(),
            work_dir: None,
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
        }
    }
}

impl WorkerConfig {
    /// Heartbeat interval as a [`Duration`]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

/// Coordinator connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CoordinatorConfig {
    /// Base URL of the coordinator's worker API
    #[serde(default = "default_coordinator_url")]
    pub url: String,

    /// Worker account name
    #[serde(default = "default_username")]
    pub username: String,

    /// Shared secret used to sign requests
    #[serde(default)]
    pub secret: String,

    /// Per-call timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_coordinator_url() -> String {
    "http://localhost:8080/pub/cpf".to_string()
}

fn default_username() -> String {
    "cpf_worker".to_string()
}

const fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            url: default_coordinator_url(),
            username: default_username(),
            secret: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl CoordinatorConfig {
    /// Request timeout as a [`Duration`]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// How the scheduling loop obtains work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Ask the coordinator for the next unit of work over HTTP
    #[default]
    Poll,
    /// Consume group assignments pushed over the control channel
    Push,
}

impl std::str::FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "poll" => Ok(Self::Poll),
            "push" => Ok(Self::Push),
            other => Err(format!("unknown dispatch mode '{other}' (expected poll or push)")),
        }
    }
}

impl std::fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Poll => f.write_str("poll"),
            Self::Push => f.write_str("push"),
        }
    }
}

/// Work dispatch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DispatchConfig {
    /// Dispatch binding
    #[serde(default)]
    pub mode: DispatchMode,

    /// Backoff increase per empty or failed attempt, in seconds
    #[serde(default = "default_backoff_step_secs")]
    pub backoff_step_secs: u64,

    /// Backoff cap, in seconds
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

const fn default_backoff_step_secs() -> u64 {
    10
}

const fn default_max_backoff_secs() -> u64 {
    60
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::default(),
            backoff_step_secs: default_backoff_step_secs(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

impl DispatchConfig {
    /// Backoff step as a [`Duration`]
    pub const fn backoff_step(&self) -> Duration {
        Duration::from_secs(self.backoff_step_secs)
    }

    /// Backoff cap as a [`Duration`]
    pub const fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

/// Control channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ControlChannelConfig {
    /// Whether to keep a control channel open
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// `host:port` of the coordinator's control endpoint
    #[serde(default = "default_channel_address")]
    pub address: String,

    /// Path signed in the handshake
    #[serde(default = "default_channel_path")]
    pub path: String,

    /// Reconnect delay increase per failure, in seconds
    #[serde(default = "default_reconnect_step_secs")]
    pub reconnect_step_secs: u64,

    /// Reconnect delay cap, in seconds
    #[serde(default = "default_reconnect_max_secs")]
    pub reconnect_max_secs: u64,

    /// Healthy connection period after which the reconnect delay resets, in seconds
    #[serde(default = "default_healthy_reset_secs")]
    pub healthy_reset_secs: u64,

    /// Window within which identical connection errors are logged once, in seconds
    #[serde(default = "default_error_log_cooldown_secs")]
    pub error_log_cooldown_secs: u64,

    /// Bounded wait for correlated round trips, in seconds
    #[serde(default = "default_round_trip_timeout_secs")]
    pub round_trip_timeout_secs: u64,
}

const fn default_true() -> bool {
    true
}

fn default_channel_address() -> String {
    "localhost:8081".to_string()
}

fn default_channel_path() -> String {
    "/worker/control".to_string()
}

const fn default_reconnect_step_secs() -> u64 {
    10
}

const fn default_reconnect_max_secs() -> u64 {
    120
}

const fn default_healthy_reset_secs() -> u64 {
    600
}

const fn default_error_log_cooldown_secs() -> u64 {
    300
}

const fn default_round_trip_timeout_secs() -> u64 {
    30
}

impl Default for ControlChannelConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            address: default_channel_address(),
            path: default_channel_path(),
            reconnect_step_secs: default_reconnect_step_secs(),
            reconnect_max_secs: default_reconnect_max_secs(),
            healthy_reset_secs: default_healthy_reset_secs(),
            error_log_cooldown_secs: default_error_log_cooldown_secs(),
            round_trip_timeout_secs: default_round_trip_timeout_secs(),
        }
    }
}

impl ControlChannelConfig {
    /// Round-trip timeout as a [`Duration`]
    pub const fn round_trip_timeout(&self) -> Duration {
        Duration::from_secs(self.round_trip_timeout_secs)
    }
}

/// Plugin runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PluginsConfig {
    /// Bounded wait for one plugin invocation, in seconds
    #[serde(default = "default_plugin_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Grace period for plugin processes and in-flight groups on shutdown, in seconds
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

const fn default_plugin_request_timeout_secs() -> u64 {
    300
}

const fn default_shutdown_grace_secs() -> u64 {
    10
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_plugin_request_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

impl PluginsConfig {
    /// Invocation timeout as a [`Duration`]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Shutdown grace as a [`Duration`]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,

    /// Directory for log files (optional, if None logs only to stdout)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Enable stdout logging
    #[serde(default = "default_true")]
    pub enable_stdout: bool,

    /// Log file rotation policy
    #[serde(default)]
    pub rotation: RotationPolicy,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Log file rotation policy
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            log_dir: None,
            enable_stdout: true,
            rotation: RotationPolicy::default(),
        }
    }
}
