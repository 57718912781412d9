//! `tandem config`: validate a config file and print the effective settings

use std::io::Write;
use std::path::Path;

pub fn execute(path: Option<&Path>) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    write_config(path, &mut out)
}

fn write_config<W: Write>(path: Option<&Path>, out: &mut W) -> anyhow::Result<()> {
    let config = super::load_config(path)?;
    write!(out, "{}", config.to_toml_string()?)?;
    writeln!(
        out,
        "# resolved runner_count = {}",
        config.resolved_runner_count()
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::fixtures_dir;
    use tandem_runtime::{ConfigError, SchedulerConfig};

    fn rendered(path: Option<&Path>) -> String {
        let mut out = Vec::new();
        write_config(path, &mut out).expect("config should render");
        String::from_utf8(out).expect("config should be UTF-8")
    }

    #[test]
    fn test_prints_effective_config() {
        let text = rendered(Some(&fixtures_dir().join("small.toml")));
        assert!(text.ends_with("# resolved runner_count = 3\n"));

        let reparsed = SchedulerConfig::from_toml_str(&text).expect("output should reparse");
        assert_eq!(reparsed.runner_count, 3);
        assert_eq!(reparsed.shutdown_grace_ms, 250);
        assert_eq!(reparsed.blocking.keep_alive_ms, 500);
    }

    #[test]
    fn test_defaults_resolve_to_cpu_count() {
        let text = rendered(None);
        let resolved = SchedulerConfig::default().resolved_runner_count();
        assert!(text.contains("runner_count = 0"));
        assert!(text.ends_with(&format!("# resolved runner_count = {}\n", resolved)));
    }

    #[test]
    fn test_rejects_invalid_file() {
        let mut out = Vec::new();
        let err = write_config(Some(&fixtures_dir().join("invalid_keep_alive.toml")), &mut out)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::Invalid(_))
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn test_rejects_malformed_file() {
        let mut out = Vec::new();
        let err =
            write_config(Some(&fixtures_dir().join("malformed.toml")), &mut out).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::Parse(_))
        ));
        assert!(out.is_empty());
    }
}
