//! Plugin modules: manifests, business application declarations and load state.

use serde::{Deserialize, Serialize};

use super::schema::FieldSpec;

/// File name of the manifest bundle inside a module's working directory.
pub const MANIFEST_FILE_NAME: &str = "module.toml";

/// Load state of a module version on this worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    /// Bundles are downloading or the execution context is starting
    Loading,
    /// Execution context is running; applications may be resolved
    Started,
    /// The last load attempt failed
    Failed,
    /// The module was unloaded
    Stopped,
}

impl ModuleState {
    pub(crate) const fn as_u8(self) -> u8 {
        match self {
            Self::Loading => 0,
            Self::Started => 1,
            Self::Failed => 2,
            Self::Stopped => 3,
        }
    }

    pub(crate) const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Loading,
            1 => Self::Started,
            2 => Self::Failed,
            _ => Self::Stopped,
        }
    }
}

impl std::fmt::Display for ModuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Loading => "loading",
            Self::Started => "started",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// How an application receives its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// Parameters are embedded in each request record and type-converted
    #[default]
    PerJob,
    /// Each request has its own input payload, passed to the plugin as a URL
    PerRequest,
}

/// How many result records an application produces per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultMode {
    /// Exactly one result record per request
    #[default]
    Single,
    /// Zero or more result records per request
    List,
}

/// A business application declared by a module manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationSpec {
    /// Application name, unique within the module
    pub name: String,
    /// Input mode
    #[serde(default)]
    pub input_mode: InputMode,
    /// Result mode
    #[serde(default)]
    pub result_mode: ResultMode,
    /// Whether the plugin needs a security service for the requesting user
    #[serde(default)]
    pub security_required: bool,
    /// Whether synthetic test-mode execution is allowed
    #[serde(default)]
    pub test_mode_enabled: bool,
    /// Declared request fields
    #[serde(default)]
    pub request_fields: Vec<FieldSpec>,
    /// Declared result fields, in output order
    #[serde(default)]
    pub result_fields: Vec<FieldSpec>,
}

impl ApplicationSpec {
    /// Create an application with default modes and no fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input_mode: InputMode::default(),
            result_mode: ResultMode::default(),
            security_required: false,
            test_mode_enabled: false,
            request_fields: Vec::new(),
            result_fields: Vec::new(),
        }
    }

    /// Whether each request carries its own input payload.
    pub fn is_per_request_input(&self) -> bool {
        self.input_mode == InputMode::PerRequest
    }
}

/// How a module's plugin code is executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RuntimeSpec {
    /// A child process started from the module's working directory,
    /// speaking line-delimited JSON over stdin/stdout
    Process {
        /// Program to run, relative to the working directory unless absolute
        command: String,
        /// Program arguments
        #[serde(default)]
        args: Vec<String>,
    },
    /// Plugin code compiled into the worker, looked up by entry name
    Builtin {
        /// Registered builtin plugin name
        entry: String,
    },
}

/// Parsed `module.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleManifest {
    /// Module name; must match the name the coordinator asked for
    pub name: String,
    /// Execution runtime
    pub runtime: RuntimeSpec,
    /// Hosted business applications
    #[serde(default)]
    pub applications: Vec<ApplicationSpec>,
}

impl ModuleManifest {
    /// Parse and validate a manifest for the expected module name.
    pub fn parse(text: &str, expected_name: &str) -> Result<Self, String> {
        let manifest: Self = toml::from_str(text).map_err(|e| e.to_string())?;
        manifest.validate(expected_name)?;
        Ok(manifest)
    }

    /// Check the manifest is usable for `expected_name`.
    pub fn validate(&self, expected_name: &str) -> Result<(), String> {
        if self.name != expected_name {
            return Err(format!(
                "manifest declares module '{}' but '{}' was requested",
                self.name, expected_name
            ));
        }
        if self.applications.is_empty() {
            return Err(format!("module '{}' declares no applications", self.name));
        }
        let mut seen = std::collections::HashSet::new();
        for app in &self.applications {
            if app.name.trim().is_empty() {
                return Err("application name cannot be empty".to_string());
            }
            if !seen.insert(app.name.as_str()) {
                return Err(format!("duplicate application '{}'", app.name));
            }
        }
        match &self.runtime {
            RuntimeSpec::Process { command, .. } if command.trim().is_empty() => {
                Err("process runtime command cannot be empty".to_string())
            }
            RuntimeSpec::Builtin { entry } if entry.trim().is_empty() => {
                Err("builtin runtime entry cannot be empty".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Include/exclude filter over module names.
///
/// Entries prefixed with `-` exclude a module; remaining entries form the
/// include list. An empty include list admits every module not excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleFilter {
    included: Vec<String>,
    excluded: Vec<String>,
}

impl ModuleFilter {
    /// Build a filter from configured module names.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        let mut filter = Self::default();
        for name in names {
            let name = name.as_ref().trim();
            if let Some(excluded) = name.strip_prefix('-') {
                filter.excluded.push(excluded.to_string());
            } else if !name.is_empty() {
                filter.included.push(name.to_string());
            }
        }
        filter
    }

    /// Whether a module may be loaded on this worker.
    pub fn allows(&self, module_name: &str) -> bool {
        (self.included.is_empty() || self.included.iter().any(|n| n == module_name))
            && !self.excluded.iter().any(|n| n == module_name)
    }
}
