//! Logging infrastructure
//!
//! Structured logging using tracing and tracing-subscriber:
//! - JSON or pretty stdout output
//! - Rolling JSON log files named after the worker id
//! - Per-group application log gating

pub mod group_log;
pub mod logger;

pub use group_log::GroupLog;
pub use logger::LoggerImpl;
