//! CLI subcommands

pub mod config;
pub mod run;

use anyhow::Context;
use std::path::Path;
use tandem_runtime::SchedulerConfig;

/// Load `path`, or the defaults when no file is given
pub fn load_config(path: Option<&Path>) -> anyhow::Result<SchedulerConfig> {
    match path {
        Some(path) => SchedulerConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(SchedulerConfig::default()),
    }
}

#[cfg(test)]
fn fixtures_dir() -> std::path::PathBuf {
    std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_load_config_defaults_without_file() {
        let config = load_config(None).expect("defaults should load");
        assert_eq!(config, SchedulerConfig::default());
    }

    #[test]
    fn test_load_config_from_file() {
        let path = fixtures_dir().join("small.toml");
        let config = load_config(Some(&path)).expect("fixture should load");
        assert_eq!(config.resolved_runner_count(), 3);
        assert_eq!(config.shutdown_grace(), Duration::from_millis(250));
        assert_eq!(config.blocking.keep_alive(), Duration::from_millis(500));
        assert_eq!(config.blocking.core_threads, 1);
    }

    #[test]
    fn test_load_config_names_the_file_on_error() {
        let path = fixtures_dir().join("missing.toml");
        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("missing.toml"));
    }
}
