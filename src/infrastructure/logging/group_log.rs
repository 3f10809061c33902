//! Per-group application log.
//!
//! Each group carries its own log level. Messages the group level admits are
//! emitted under the `app` target at INFO, so a single job can be traced at
//! debug detail without lowering the worker's global filter.

use tracing::Level;

/// Application log for one executing group.
#[derive(Debug, Clone)]
pub struct GroupLog {
    group_id: String,
    application: String,
    level: Level,
}

impl GroupLog {
    /// Create a log for a group. Unknown levels fall back to `error`.
    pub fn new(group_id: impl Into<String>, application: impl Into<String>, level: &str) -> Self {
        Self {
            group_id: group_id.into(),
            application: application.into(),
            level: super::logger::parse_log_level(level).unwrap_or(Level::ERROR),
        }
    }

    /// Whether messages at `level` are recorded.
    pub fn enabled(&self, level: Level) -> bool {
        // tracing orders levels by verbosity: TRACE > DEBUG > ... > ERROR
        level <= self.level
    }

    /// Whether debug messages are recorded.
    pub fn is_debug_enabled(&self) -> bool {
        self.enabled(Level::DEBUG)
    }

    /// Record a debug message.
    pub fn debug(&self, message: &str) {
        if self.is_debug_enabled() {
            tracing::info!(
                target: "app",
                group_id = %self.group_id,
                application = %self.application,
                app_level = "DEBUG",
                "{message}"
            );
        }
    }

    /// Record an info message.
    pub fn info(&self, message: &str) {
        if self.enabled(Level::INFO) {
            tracing::info!(
                target: "app",
                group_id = %self.group_id,
                application = %self.application,
                app_level = "INFO",
                "{message}"
            );
        }
    }

    /// Record an error message; always admitted.
    pub fn error(&self, message: &str) {
        tracing::error!(
            target: "app",
            group_id = %self.group_id,
            application = %self.application,
            "{message}"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_gating() {
        let log = GroupLog::new("g1", "point", "debug");
        assert!(log.is_debug_enabled());
        assert!(log.enabled(Level::ERROR));
        assert!(!log.enabled(Level::TRACE));

        let quiet = GroupLog::new("g1", "point", "error");
        assert!(!quiet.is_debug_enabled());
        assert!(!quiet.enabled(Level::INFO));
    }

    #[test]
    fn test_unknown_level_defaults_to_error() {
        let log = GroupLog::new("g1", "point", "chatty");
        assert!(!log.enabled(Level::WARN));
        assert!(log.enabled(Level::ERROR));
    }
}
