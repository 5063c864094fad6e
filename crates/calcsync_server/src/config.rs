//! Server configuration.

use crate::auth::AuthConfig;
use std::path::PathBuf;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Database file; `None` keeps everything in memory.
    pub database_path: Option<PathBuf>,
    /// Largest accepted request body, in bytes.
    pub max_body_bytes: usize,
    /// Largest number of records in one download answer.
    pub max_download_batch: usize,
    /// Token settings; `None` disables authentication.
    pub auth: Option<AuthConfig>,
}

impl ServerConfig {
    /// A server persisting to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: Some(path.into()),
            ..Self::in_memory()
        }
    }

    /// A server keeping its rows in memory.
    pub fn in_memory() -> Self {
        Self {
            database_path: None,
            max_body_bytes: 1024 * 1024,
            max_download_batch: 10_000,
            auth: None,
        }
    }

    /// Sets the body size limit.
    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }

    /// Sets the download batch limit.
    pub fn with_max_download_batch(mut self, max: usize) -> Self {
        self.max_download_batch = max.max(1);
        self
    }

    /// Requires bearer tokens signed with `secret`.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.auth = Some(AuthConfig::new(secret));
        self
    }

    /// Requires bearer tokens with custom settings.
    pub fn with_auth_config(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Returns true when requests must carry a valid token.
    pub fn requires_auth(&self) -> bool {
        self.auth.is_some()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert!(config.database_path.is_none());
        assert!(!config.requires_auth());
        assert_eq!(config.max_body_bytes, 1024 * 1024);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new("/var/lib/calcsync/server.db")
            .with_max_body_bytes(4096)
            .with_max_download_batch(0)
            .with_auth(vec![1, 2, 3, 4]);

        assert_eq!(config.max_body_bytes, 4096);
        assert_eq!(config.max_download_batch, 1);
        assert!(config.requires_auth());
        assert_eq!(config.auth.unwrap().secret, vec![1, 2, 3, 4]);
    }
}
