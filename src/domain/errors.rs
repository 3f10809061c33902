//! Domain errors for the group worker.

use thiserror::Error;

use super::models::group::RequestErrorCode;
use super::models::schema::ConversionError;

/// Errors talking to the coordinator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("Coordinator unreachable: {0}")]
    Transport(String),

    #[error("Coordinator call timed out")]
    Timeout,

    #[error("Coordinator resource not found: {0}")]
    NotFound(String),

    #[error("Coordinator returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid coordinator response: {0}")]
    Decode(String),

    #[error("Local I/O error: {0}")]
    Io(String),
}

impl CoordinatorError {
    /// Whether retrying later may succeed.
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout | Self::Io(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::NotFound(_) | Self::Decode(_) => false,
        }
    }

    /// Whether the coordinator reported the resource as missing or gone.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<std::io::Error> for CoordinatorError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors loading a module version.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModuleLoadError {
    #[error("Failed to download bundles: {0}")]
    Download(#[from] CoordinatorError),

    #[error("Invalid module manifest: {0}")]
    Manifest(String),

    #[error("Failed to start plugin runtime: {0}")]
    Runtime(String),

    #[error("Working directory error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ModuleLoadError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors raised while invoking plugin logic for one request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("{0}")]
    BadInputData(String),

    #[error("{message}")]
    Recoverable {
        message: String,
        trace: Option<String>,
    },

    #[error("{message}")]
    Processing {
        message: String,
        trace: Option<String>,
    },

    /// The execution context is gone; the module is no longer usable
    #[error("Plugin runtime unavailable: {0}")]
    Unavailable(String),

    #[error("Plugin did not answer within {0:?}")]
    Timeout(std::time::Duration),
}

impl PluginError {
    /// Processing error without a trace.
    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing {
            message: message.into(),
            trace: None,
        }
    }

    /// Per-request error code for this failure.
    pub const fn error_code(&self) -> RequestErrorCode {
        match self {
            Self::BadInputData(_) => RequestErrorCode::BadInputDataValue,
            Self::Recoverable { .. } => RequestErrorCode::RecoverableException,
            Self::Processing { .. } | Self::Unavailable(_) | Self::Timeout(_) => {
                RequestErrorCode::ErrorProcessingRequest
            }
        }
    }

    /// Diagnostic trace, when the plugin supplied one.
    pub fn trace(&self) -> Option<&str> {
        match self {
            Self::Recoverable { trace, .. } | Self::Processing { trace, .. } => trace.as_deref(),
            _ => None,
        }
    }
}

impl From<ConversionError> for PluginError {
    fn from(err: ConversionError) -> Self {
        Self::BadInputData(err.to_string())
    }
}

/// Errors on the control channel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Control channel is not connected")]
    NotConnected,

    #[error("No response within {0:?}")]
    Timeout(std::time::Duration),

    #[error("Control channel closed")]
    Closed,

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Control channel I/O error: {0}")]
    Io(String),

    #[error("Invalid control message: {0}")]
    Codec(String),
}
