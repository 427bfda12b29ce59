use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::pipeline::Args;

/// Config file looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "gcpscout.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Defaults loaded from `gcpscout.toml`. CLI flags override every field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScoutConfig {
    /// Service account key file; application default credentials when unset.
    pub creds_file: Option<PathBuf>,

    #[serde(default)]
    pub include_sys_projects: bool,

    /// Concurrent region/zone workers per project.
    pub concurrency: Option<usize>,

    /// Where module JSON output files are written.
    pub output_dir: Option<PathBuf>,

    #[serde(default)]
    pub log_format: LogFormat,

    /// Largest object, in bytes, the secrets path downloads.
    pub max_file_size: Option<u64>,
}

impl ScoutConfig {
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file '{}'", path.display()))
    }

    /// Load `explicit` when given (missing file is an error), else `gcpscout.toml` in `dir`
    /// when present, else defaults.
    pub fn discover(explicit: Option<&Path>, dir: &Path) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let candidate = dir.join(DEFAULT_CONFIG_FILE);
                if candidate.is_file() {
                    Self::load(&candidate)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Fill link arguments the caller did not set.
    pub fn apply(&self, args: &Args) -> Args {
        let mut args = args.clone();
        if let Some(path) = &self.creds_file {
            if !args.contains("creds-file") {
                args = args.with("creds-file", path.display().to_string());
            }
        }
        if self.include_sys_projects && !args.contains("include-sys-projects") {
            args = args.with("include-sys-projects", true);
        }
        if let Some(n) = self.concurrency {
            if !args.contains("concurrency") {
                args = args.with("concurrency", n);
            }
        }
        if let Some(size) = self.max_file_size {
            if !args.contains("max-file-size") {
                args = args.with("max-file-size", i64::try_from(size).unwrap_or(i64::MAX));
            }
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_full_config() {
        let config = ScoutConfig::from_toml(
            r#"
creds_file = "/keys/sa.json"
include_sys_projects = true
concurrency = 4
output_dir = "out"
log_format = "json"
max_file_size = 2048
"#,
        )
        .unwrap();
        assert_eq!(
            config,
            ScoutConfig {
                creds_file: Some(PathBuf::from("/keys/sa.json")),
                include_sys_projects: true,
                concurrency: Some(4),
                output_dir: Some(PathBuf::from("out")),
                log_format: LogFormat::Json,
                max_file_size: Some(2048),
            }
        );
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = ScoutConfig::from_toml("concurency = 4").unwrap_err();
        assert!(format!("{:#}", err).contains("unknown field"));
    }

    #[test]
    fn test_flags_override_config() {
        let config =
            ScoutConfig { concurrency: Some(3), max_file_size: Some(100), ..Default::default() };
        let args = config.apply(&Args::new().with("concurrency", 8i64));
        assert_eq!(args.int("concurrency"), Some(8));
        assert_eq!(args.int("max-file-size"), Some(100));
        assert!(!args.contains("creds-file"));
    }

    #[test]
    fn test_discover_prefers_explicit_then_default_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(ScoutConfig::discover(None, dir.path()).unwrap(), ScoutConfig::default());

        std::fs::write(dir.path().join(DEFAULT_CONFIG_FILE), "concurrency = 2\n").unwrap();
        assert_eq!(ScoutConfig::discover(None, dir.path()).unwrap().concurrency, Some(2));

        let missing = dir.path().join("nope.toml");
        let err = ScoutConfig::discover(Some(&missing), dir.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
