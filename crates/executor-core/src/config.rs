//! Typed configuration for the execution core.

use serde::{Deserialize, Serialize};

/// Configuration controlling worker startup and logging behavior.
///
/// Loaded the same way as the rest of this codebase's configuration
/// surfaces: a TOML file via [`ExecutorConfig::load`], or environment
/// variables via [`ExecutorConfig::from_env`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Start the worker task as soon as the `Executor` is constructed,
    /// instead of requiring an explicit `start()` call.
    #[serde(default)]
    pub auto_start: bool,

    /// Hint for the number of jobs the `ExecutorQueue` is expected to hold
    /// at once; used only to size the internal buffer, never enforced as
    /// a hard cap; the queue itself is unbounded.
    #[serde(default = "default_queue_capacity_hint")]
    pub queue_capacity_hint: usize,

    /// If true, `enqueue*` rejects actions the checkpoint store reports as
    /// non-recoverable instead of accepting them with a logged warning.
    #[serde(default)]
    pub reject_unrecoverable_actions: bool,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            auto_start: false,
            queue_capacity_hint: default_queue_capacity_hint(),
            reject_unrecoverable_actions: false,
            logging: LoggingConfig::default(),
        }
    }
}

fn default_queue_capacity_hint() -> usize {
    64
}

impl ExecutorConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, crate::ExecutorError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| crate::ExecutorError::Config(format!("failed to read config file: {e}")))?;
        toml::from_str(&contents)
            .map_err(|e| crate::ExecutorError::Config(format!("failed to parse config: {e}")))
    }

    /// Build configuration from `EXECUTOR_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, crate::ExecutorError> {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("EXECUTOR_AUTO_START") {
            config.auto_start = parse_bool(&value)?;
        }
        if let Ok(value) = std::env::var("EXECUTOR_QUEUE_CAPACITY_HINT") {
            config.queue_capacity_hint = value
                .parse()
                .map_err(|_| crate::ExecutorError::Config(format!("invalid queue capacity hint: {value}")))?;
        }
        if let Ok(value) = std::env::var("EXECUTOR_REJECT_UNRECOVERABLE_ACTIONS") {
            config.reject_unrecoverable_actions = parse_bool(&value)?;
        }
        if let Ok(value) = std::env::var("EXECUTOR_LOG_LEVEL") {
            config.logging.level = value;
        }

        Ok(config)
    }
}

fn parse_bool(value: &str) -> Result<bool, crate::ExecutorError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(crate::ExecutorError::Config(format!("invalid boolean: {other}"))),
    }
}

/// Logging verbosity knobs, read by the CLI / host process when it
/// installs the `tracing` subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing-subscriber` `EnvFilter`-compatible directive string.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_conservative() {
        let config = ExecutorConfig::default();
        assert!(!config.auto_start);
        assert!(!config.reject_unrecoverable_actions);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("true").unwrap());
        assert!(parse_bool("1").unwrap());
        assert!(!parse_bool("false").unwrap());
        assert!(parse_bool("nonsense").is_err());
    }
}
