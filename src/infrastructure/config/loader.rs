use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use thiserror::Error;

use crate::domain::models::config::{Config, DispatchMode};

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_concurrent_groups: {0}. Must be between 1 and 256")]
    InvalidConcurrency(usize),

    #[error("Coordinator URL cannot be empty")]
    EmptyCoordinatorUrl,

    #[error("Coordinator username cannot be empty")]
    EmptyUsername,

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error(
        "Invalid backoff configuration: backoff_step_secs ({0}) must not exceed max_backoff_secs ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error(
        "Invalid reconnect configuration: reconnect_step_secs ({0}) must not exceed reconnect_max_secs ({1})"
    )]
    InvalidReconnect(u64, u64),

    #[error("{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("Push dispatch requires an enabled control channel with an address")]
    PushWithoutChannel,
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .groupworker/config.yaml
    /// 3. .groupworker/local.yaml (optional local overrides)
    /// 4. Environment variables (GROUPWORKER_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config = Self::extract(None)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    ///
    /// Environment variables still override the file.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config = Self::extract(Some(path.as_ref()))?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Merge defaults, files and environment without validating, so callers
    /// can apply command-line overrides first.
    pub fn extract(path: Option<&std::path::Path>) -> Result<Config> {
        let figment = match path {
            Some(path) => Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(Yaml::file(path))
                .merge(Env::prefixed("GROUPWORKER_").split("__")),
            None => Self::figment(),
        };
        let source = path.map_or_else(
            || "the default locations".to_string(),
            |p| p.display().to_string(),
        );
        figment
            .extract()
            .with_context(|| format!("Failed to load config from {source}"))
    }

    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".groupworker/config.yaml"))
            .merge(Yaml::file(".groupworker/local.yaml"))
            .merge(Env::prefixed("GROUPWORKER_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let n = config.worker.max_concurrent_groups;
        if n == 0 || n > 256 {
            return Err(ConfigError::InvalidConcurrency(n));
        }

        if config.coordinator.url.trim().is_empty() {
            return Err(ConfigError::EmptyCoordinatorUrl);
        }
        if config.coordinator.username.trim().is_empty() {
            return Err(ConfigError::EmptyUsername);
        }
        if config.coordinator.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("coordinator.request_timeout_secs"));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let dispatch = &config.dispatch;
        if dispatch.backoff_step_secs > dispatch.max_backoff_secs {
            return Err(ConfigError::InvalidBackoff(
                dispatch.backoff_step_secs,
                dispatch.max_backoff_secs,
            ));
        }

        let channel = &config.control_channel;
        if channel.reconnect_step_secs > channel.reconnect_max_secs {
            return Err(ConfigError::InvalidReconnect(
                channel.reconnect_step_secs,
                channel.reconnect_max_secs,
            ));
        }
        if channel.round_trip_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("control_channel.round_trip_timeout_secs"));
        }
        if dispatch.mode == DispatchMode::Push
            && (!channel.enabled || channel.address.trim().is_empty())
        {
            return Err(ConfigError::PushWithoutChannel);
        }

        if config.plugins.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("plugins.request_timeout_secs"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::config::LogFormat;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.worker.max_concurrent_groups, 4);
        assert_eq!(config.dispatch.backoff_step_secs, 10);
        assert_eq!(config.dispatch.max_backoff_secs, 60);
        assert_eq!(config.worker.heartbeat_interval_secs, 300);
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
worker:
  environment: prod
  max_concurrent_groups: 8
  module_names: [geo, -roads]
coordinator:
  url: https://cpf.example.com/pub/cpf
  username: w1
  secret: s3cret
dispatch:
  mode: push
  backoff_step_secs: 5
  max_backoff_secs: 30
logging:
  level: debug
  format: pretty
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.worker.environment, "prod");
        assert_eq!(config.worker.max_concurrent_groups, 8);
        assert_eq!(config.worker.module_names, vec!["geo", "-roads"]);
        assert_eq!(config.coordinator.secret, "s3cret");
        assert_eq!(config.dispatch.mode, DispatchMode::Push);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.control_channel.enabled);

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let mut config = Config::default();
        config.worker.max_concurrent_groups = 0;

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidConcurrency(0))
        ));
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();

        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "invalid"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_invalid_backoff() {
        let mut config = Config::default();
        config.dispatch.backoff_step_secs = 90;

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidBackoff(90, 60))
        ));
    }

    #[test]
    fn test_validate_push_requires_channel() {
        let mut config = Config::default();
        config.dispatch.mode = DispatchMode::Push;
        config.control_channel.enabled = false;

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::PushWithoutChannel)
        ));
    }

    #[test]
    fn test_validate_empty_coordinator_url() {
        let mut config = Config::default();
        config.coordinator.url = "  ".to_string();

        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::EmptyCoordinatorUrl)
        ));
    }

    #[test]
    fn test_env_override() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "worker:\n  max_concurrent_groups: 2").unwrap();
        file.flush().unwrap();

        temp_env::with_vars(
            [
                ("GROUPWORKER_WORKER__MAX_CONCURRENT_GROUPS", Some("12")),
                ("GROUPWORKER_LOGGING__LEVEL", Some("debug")),
            ],
            || {
                let config = ConfigLoader::load_from_file(file.path()).unwrap();
                assert_eq!(config.worker.max_concurrent_groups, 12, "env should win");
                assert_eq!(config.logging.level, "debug");
            },
        );
    }

    #[test]
    fn test_hierarchical_merging() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(
            base_file,
            "worker:\n  max_concurrent_groups: 5\nlogging:\n  level: info\n  format: json"
        )
        .unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(
            override_file,
            "worker:\n  max_concurrent_groups: 15\nlogging:\n  level: debug"
        )
        .unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.worker.max_concurrent_groups, 15, "Override should win");
        assert_eq!(
            config.logging.level, "debug",
            "Override should win for nested fields"
        );
        assert_eq!(
            config.logging.format,
            LogFormat::Json,
            "Base value should persist when not overridden"
        );
    }
}
