//! Configuration for the integrity service.

use calcsync_core::Severity;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for checks, repair and backups.
#[derive(Debug, Clone)]
pub struct IntegrityConfig {
    /// Where backups go; `None` uses the store's `backups/` directory.
    pub backups_dir: Option<PathBuf>,
    /// Interval for periodic full checks; `None` disables them.
    pub check_interval: Option<Duration>,
    /// Interval for automatic backups; `None` disables them.
    pub backup_interval: Option<Duration>,
    /// Automatic backups kept by pruning.
    pub keep_automatic: usize,
    /// Highest severity a periodic check fixes on its own.
    pub auto_fix_ceiling: Option<Severity>,
}

impl IntegrityConfig {
    /// Daily checks and backups, seven automatic backups kept, no
    /// unattended fixes.
    #[must_use]
    pub fn new() -> Self {
        Self {
            backups_dir: None,
            check_interval: Some(Duration::from_secs(24 * 60 * 60)),
            backup_interval: Some(Duration::from_secs(24 * 60 * 60)),
            keep_automatic: 7,
            auto_fix_ceiling: None,
        }
    }

    /// Sets the backup directory.
    #[must_use]
    pub fn with_backups_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backups_dir = Some(dir.into());
        self
    }

    /// Sets or disables the check interval.
    #[must_use]
    pub fn with_check_interval(mut self, interval: Option<Duration>) -> Self {
        self.check_interval = interval;
        self
    }

    /// Sets or disables the automatic backup interval.
    #[must_use]
    pub fn with_backup_interval(mut self, interval: Option<Duration>) -> Self {
        self.backup_interval = interval;
        self
    }

    /// Sets how many automatic backups pruning keeps.
    #[must_use]
    pub fn with_keep_automatic(mut self, keep: usize) -> Self {
        self.keep_automatic = keep;
        self
    }

    /// Lets periodic checks fix issues up to `ceiling`.
    #[must_use]
    pub fn with_auto_fix(mut self, ceiling: Severity) -> Self {
        self.auto_fix_ceiling = Some(ceiling);
        self
    }
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = IntegrityConfig::new()
            .with_backups_dir("/tmp/b")
            .with_check_interval(None)
            .with_keep_automatic(2)
            .with_auto_fix(Severity::Warning);
        assert!(config.check_interval.is_none());
        assert!(config.backup_interval.is_some());
        assert_eq!(config.keep_automatic, 2);
        assert_eq!(config.auto_fix_ceiling, Some(Severity::Warning));
    }
}
