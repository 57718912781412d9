//! Scheduler configuration
//!
//! Every field has a default, so an empty TOML document is a valid config:
//!
//! ```toml
//! runner_count = 4            # 0 = one runner per CPU
//! shutdown_grace_ms = 15000
//!
//! [blocking]
//! core_threads = 1
//! keep_alive_ms = 60000
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default wait for in-flight blocking work during `stop()`
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

/// Default idle time before a surplus blocking thread exits
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Default number of blocking threads kept alive while idle
pub const DEFAULT_CORE_THREADS: usize = 1;

/// Whole milliseconds in `duration`, clamped to `u64::MAX`
pub fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Top-level scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of non-blocking runner threads (0 = number of CPUs)
    pub runner_count: usize,

    /// Milliseconds `stop()` waits for the blocking pool to drain
    pub shutdown_grace_ms: u64,

    /// Runner thread names are `<prefix>-<id>`
    pub runner_thread_prefix: String,

    /// Blocking thread names are `<prefix>-<n>`
    pub blocking_thread_prefix: String,

    /// Blocking pool sizing
    pub blocking: BlockingConfig,
}

/// Blocking pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockingConfig {
    /// Threads that never retire while idle
    pub core_threads: usize,

    /// Milliseconds a surplus thread may sit idle before exiting
    pub keep_alive_ms: u64,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            core_threads: DEFAULT_CORE_THREADS,
            keep_alive_ms: saturating_millis(DEFAULT_KEEP_ALIVE),
        }
    }
}

impl BlockingConfig {
    /// Idle keep-alive as a duration
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            runner_count: 0,
            shutdown_grace_ms: saturating_millis(DEFAULT_SHUTDOWN_GRACE),
            runner_thread_prefix: "actor-runner".to_string(),
            blocking_thread_prefix: "blocking-task-runner".to_string(),
            blocking: BlockingConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Parse a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runner_thread_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "runner_thread_prefix must not be empty".to_string(),
            ));
        }
        if self.blocking_thread_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "blocking_thread_prefix must not be empty".to_string(),
            ));
        }
        if self.blocking.keep_alive_ms == 0 {
            return Err(ConfigError::Invalid(
                "blocking.keep_alive_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Runner count with `0` resolved to the number of CPUs
    pub fn resolved_runner_count(&self) -> usize {
        if self.runner_count == 0 {
            num_cpus::get()
        } else {
            self.runner_count
        }
    }

    /// Shutdown grace as a duration
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Set the runner count
    pub fn with_runner_count(mut self, runner_count: usize) -> Self {
        self.runner_count = runner_count;
        self
    }

    /// Set the shutdown grace period
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = saturating_millis(grace);
        self
    }

    /// Set the blocking keep-alive
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.blocking.keep_alive_ms = saturating_millis(keep_alive);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.runner_count, 0);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(15));
        assert_eq!(config.blocking.core_threads, 1);
        assert_eq!(config.blocking.keep_alive(), Duration::from_secs(60));
        assert_eq!(config.resolved_runner_count(), num_cpus::get());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = SchedulerConfig::from_toml_str("").unwrap();
        assert_eq!(config, SchedulerConfig::default());
    }

    #[test]
    fn test_partial_document() {
        let config = SchedulerConfig::from_toml_str(
            r#"
            runner_count = 3
            shutdown_grace_ms = 250

            [blocking]
            keep_alive_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.resolved_runner_count(), 3);
        assert_eq!(config.shutdown_grace(), Duration::from_millis(250));
        assert_eq!(config.blocking.core_threads, 1);
        assert_eq!(config.blocking.keep_alive(), Duration::from_millis(500));
        assert_eq!(config.runner_thread_prefix, "actor-runner");
    }

    #[test]
    fn test_rejects_zero_keep_alive() {
        let err = SchedulerConfig::from_toml_str("[blocking]\nkeep_alive_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_empty_prefix() {
        let config = SchedulerConfig {
            runner_thread_prefix: String::new(),
            ..SchedulerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_unknown_types() {
        let err = SchedulerConfig::from_toml_str("runner_count = \"four\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = SchedulerConfig::default()
            .with_runner_count(2)
            .with_shutdown_grace(Duration::from_secs(1));
        let rendered = config.to_toml_string().unwrap();
        assert_eq!(SchedulerConfig::from_toml_str(&rendered).unwrap(), config);
    }

    #[test]
    fn test_huge_durations_saturate() {
        let config = SchedulerConfig::default()
            .with_shutdown_grace(Duration::MAX)
            .with_keep_alive(Duration::MAX);
        assert_eq!(config.shutdown_grace_ms, u64::MAX);
        assert_eq!(config.blocking.keep_alive_ms, u64::MAX);

        assert_eq!(saturating_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(saturating_millis(Duration::from_micros(999)), 0);
    }

    #[test]
    fn test_missing_file() {
        let err = SchedulerConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
