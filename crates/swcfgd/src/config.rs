//! Engine configuration.
//!
//! Everything here has a working default, so the daemon runs without a
//! configuration file. A YAML file can override any subset of the fields:
//!
//! ```yaml
//! update-retry-max: 3
//! delimiter: ":"
//! dump:
//!   tmp-dir: /var/tmp
//!   max-concurrent: 2
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use swcfg_common::{RetryPolicy, DEFAULT_DELIMITER, DEFAULT_NAMESPACE_MAX};
use thiserror::Error;

/// Default staging directory of dump workers.
pub const DEFAULT_DUMP_TMP_DIR: &str = "/tmp";

/// Dumps larger than this spill from memory to an unlinked file.
pub const DEFAULT_SPOOL_LIMIT: usize = 1024 * 1024;

pub const DEFAULT_MAX_CONCURRENT_DUMPS: usize = 4;

/// Errors raised while loading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration for {field}: {message}")]
    Invalid { field: String, message: String },
}

/// Dump worker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DumpConfig {
    /// Initial value of the shared staging directory.
    pub tmp_dir: PathBuf,
    pub spool_limit: usize,
    pub max_concurrent: usize,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            tmp_dir: PathBuf::from(DEFAULT_DUMP_TMP_DIR),
            spool_limit: DEFAULT_SPOOL_LIMIT,
            max_concurrent: DEFAULT_MAX_CONCURRENT_DUMPS,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Apply attempts per auto-committed update.
    pub update_retry_max: RetryPolicy,
    /// Separator between namespace and object name.
    pub delimiter: String,
    /// Longest accepted namespace name.
    pub namespace_max: usize,
    pub dump: DumpConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            update_retry_max: RetryPolicy::default(),
            delimiter: DEFAULT_DELIMITER.to_string(),
            namespace_max: DEFAULT_NAMESPACE_MAX,
            dump: DumpConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads and validates a YAML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EngineConfig =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.delimiter.is_empty() || self.delimiter.chars().any(char::is_whitespace) {
            return Err(ConfigError::Invalid {
                field: "delimiter".to_string(),
                message: format!("'{}' is not a usable delimiter", self.delimiter),
            });
        }
        if self.namespace_max == 0 {
            return Err(ConfigError::Invalid {
                field: "namespace-max".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.dump.max_concurrent == 0 {
            return Err(ConfigError::Invalid {
                field: "dump.max-concurrent".to_string(),
                message: "at least one dump worker is required".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.update_retry_max.max_attempts(), 2);
        assert_eq!(config.delimiter, ":");
        assert_eq!(config.dump.tmp_dir, PathBuf::from("/tmp"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "update-retry-max: 3\ndelimiter: /\ndump:\n  max-concurrent: 1").unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.update_retry_max.max_attempts(), 3);
        assert_eq!(config.delimiter, "/");
        assert_eq!(config.dump.max_concurrent, 1);
        assert_eq!(config.dump.spool_limit, DEFAULT_SPOOL_LIMIT);
        assert_eq!(config.namespace_max, DEFAULT_NAMESPACE_MAX);
    }

    #[test]
    fn test_load_rejects_empty_delimiter() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "delimiter: \"\"").unwrap();

        match EngineConfig::load(file.path()) {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "delimiter"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            EngineConfig::load("/nonexistent/swcfgd.yaml"),
            Err(ConfigError::Read { .. })
        ));
    }
}
