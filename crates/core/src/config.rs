//! File configuration.
//!
//! `toolpack.toml` supplies defaults for any option not given on the command
//! line or through the environment:
//!
//! ```toml
//! artifacts = "./artifacts"
//! cache_dir = "/var/cache/toolpack"
//! output = "./package"
//! include = ["Windows.*"]
//! exclude = ["*.Deprecated"]
//! concurrency = 8
//! timeout_secs = 600
//! validate_hashes = true
//! offline = true
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{Error, Result};

/// Config file looked up in the working directory.
pub const CONFIG_FILE: &str = "toolpack.toml";

/// Contents of a `toolpack.toml`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackConfig {
    /// Artifact source directory.
    pub artifacts: Option<PathBuf>,
    /// Tool cache root.
    pub cache_dir: Option<PathBuf>,
    /// Output directory.
    pub output: Option<PathBuf>,
    /// Artifact name include patterns.
    pub include: Vec<String>,
    /// Artifact name exclude patterns.
    pub exclude: Vec<String>,
    /// Concurrent downloads.
    pub concurrency: Option<usize>,
    /// Per-download timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Validate declared hashes.
    pub validate_hashes: Option<bool>,
    /// Write an offline archive.
    pub offline: Option<bool>,
}

impl PackConfig {
    /// Parse TOML content.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming `origin` when the content is not
    /// valid.
    pub fn parse(content: &str, origin: &Path) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| {
            Error::configuration(format!("Invalid config {}: {e}", origin.display()))
        })?;
        if config.concurrency == Some(0) {
            return Err(Error::configuration(format!(
                "Invalid config {}: concurrency must be at least 1",
                origin.display()
            )));
        }
        Ok(config)
    }

    /// Load a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| Error::io(e, path, "read config"))?;
        let config = Self::parse(&content, path)?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Load `toolpack.toml` from `dir` if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn discover(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(CONFIG_FILE);
        if path.is_file() {
            Self::load(&path).map(Some)
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_full() {
        let config = PackConfig::parse(
            r#"
artifacts = "./artifacts"
include = ["Windows.*"]
concurrency = 8
timeout_secs = 60
validate_hashes = true
"#,
            Path::new("toolpack.toml"),
        )
        .unwrap();
        assert_eq!(config.artifacts, Some(PathBuf::from("./artifacts")));
        assert_eq!(config.include, vec!["Windows.*"]);
        assert_eq!(config.concurrency, Some(8));
        assert_eq!(config.timeout_secs, Some(60));
        assert_eq!(config.validate_hashes, Some(true));
        assert!(config.offline.is_none());
        assert!(config.exclude.is_empty());
    }

    #[test]
    fn test_empty_is_default() {
        let config = PackConfig::parse("", Path::new("x.toml")).unwrap();
        assert_eq!(config, PackConfig::default());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = PackConfig::parse("paralellism = 3\n", Path::new("x.toml")).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(err.to_string().contains("x.toml"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let err = PackConfig::parse("concurrency = 0\n", Path::new("x.toml")).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn test_discover() {
        let temp = TempDir::new().unwrap();
        assert!(PackConfig::discover(temp.path()).unwrap().is_none());

        std::fs::write(temp.path().join(CONFIG_FILE), "offline = true\n").unwrap();
        let config = PackConfig::discover(temp.path()).unwrap().unwrap();
        assert_eq!(config.offline, Some(true));
    }
}
