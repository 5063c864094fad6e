//! CLI command implementations.

pub mod backup;
pub mod inspect;
pub mod maintain;
pub mod queue;
pub mod repair;
pub mod verify;

use crate::config::CliConfig;
use calcsync_integrity::DataIntegrityService;
use calcsync_store::{LocalStore, StoreConfig};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Result type shared by commands.
pub type CommandResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Opens an existing store; commands never create one.
pub fn open_store(path: &Path) -> CommandResult<Arc<LocalStore>> {
    let store = LocalStore::open(StoreConfig::new(path).create_if_missing(false))?;
    Ok(Arc::new(store))
}

/// Opens the store behind an integrity service.
pub fn open_service(path: &Path, config: &CliConfig) -> CommandResult<DataIntegrityService> {
    Ok(DataIntegrityService::new(open_store(path)?, config.integrity()))
}

/// Parses a backup or queue item id.
pub fn parse_id(text: &str) -> CommandResult<Uuid> {
    Uuid::parse_str(text).map_err(|_| format!("not a valid id: {text}").into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn commands_do_not_create_stores() {
        let temp = tempdir().unwrap();
        assert!(open_store(&temp.path().join("missing")).is_err());
        assert!(!temp.path().join("missing").exists());
    }

    #[test]
    fn service_uses_configured_backup_dir() {
        let temp = tempdir().unwrap();
        drop(LocalStore::open(StoreConfig::new(temp.path())).unwrap());
        let config = CliConfig {
            backups_dir: Some(temp.path().join("elsewhere")),
            ..CliConfig::default()
        };
        let service = open_service(temp.path(), &config).unwrap();
        assert_eq!(service.backups().dir(), Some(temp.path().join("elsewhere").as_path()));
    }

    #[test]
    fn ids_must_be_uuids() {
        assert!(parse_id("nope").is_err());
        assert!(parse_id(&Uuid::nil().to_string()).is_ok());
    }
}
