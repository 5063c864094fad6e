//! Optional JSON configuration file.

use calcsync_core::Severity;
use calcsync_integrity::IntegrityConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid configuration JSON.
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
}

/// Maintenance settings. Intervals are in seconds; `0` disables a task.
///
/// ```json
/// {
///   "backups_dir": "/var/backups/calcsync",
///   "check_interval_secs": 86400,
///   "backup_interval_secs": 86400,
///   "keep_automatic": 7,
///   "auto_fix_ceiling": "warning"
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CliConfig {
    pub backups_dir: Option<PathBuf>,
    pub check_interval_secs: Option<u64>,
    pub backup_interval_secs: Option<u64>,
    pub keep_automatic: Option<usize>,
    pub auto_fix_ceiling: Option<Severity>,
}

impl CliConfig {
    /// Loads `path`, or the defaults when no file was given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies the file's settings over the integrity defaults.
    pub fn integrity(&self) -> IntegrityConfig {
        let mut config = IntegrityConfig::new();
        if let Some(dir) = &self.backups_dir {
            config = config.with_backups_dir(dir);
        }
        if let Some(secs) = self.check_interval_secs {
            config = config.with_check_interval(interval(secs));
        }
        if let Some(secs) = self.backup_interval_secs {
            config = config.with_backup_interval(interval(secs));
        }
        if let Some(keep) = self.keep_automatic {
            config = config.with_keep_automatic(keep);
        }
        if let Some(ceiling) = self.auto_fix_ceiling {
            config = config.with_auto_fix(ceiling);
        }
        config
    }
}

fn interval(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
