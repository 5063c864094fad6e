//! Backup commands.

use super::{open_service, parse_id, CommandResult};
use crate::config::CliConfig;
use calcsync_core::{format_timestamp, BackupReason};
use std::path::Path;
use tracing::info;

/// Creates a manual backup.
pub fn create(
    path: &Path,
    config: &CliConfig,
    name: &str,
    description: Option<&str>,
) -> CommandResult {
    let service = open_service(path, config)?;
    let backup = service.create_backup(name, description, BackupReason::Manual)?;
    service.store().close()?;

    println!("✓ Backup created successfully");
    println!("  Id: {}", backup.id);
    println!("  Path: {}", backup.file_path.display());
    println!("  Size: {} bytes", backup.size_bytes);
    println!("  Rows: {}", backup.total_rows());
    println!("  Checksum: {}", backup.checksum);
    Ok(())
}

/// Lists the backup catalog.
pub fn list(path: &Path, config: &CliConfig) -> CommandResult {
    let service = open_service(path, config)?;
    let backups = service.list_backups()?;
    service.store().close()?;

    if backups.is_empty() {
        println!("No backups");
        return Ok(());
    }
    for backup in backups {
        println!(
            "{}  {}  {:<11} {:>10} bytes  {}",
            backup.id,
            format_timestamp(&backup.created_at),
            backup.reason.as_str(),
            backup.size_bytes,
            backup.name
        );
    }
    Ok(())
}

/// Verifies one backup's checksum.
pub fn verify(path: &Path, config: &CliConfig, id: &str) -> CommandResult {
    let id = parse_id(id)?;
    let service = open_service(path, config)?;
    let ok = service.verify_backup(id)?;
    service.store().close()?;

    if ok {
        println!("✓ Backup {id} is intact");
        Ok(())
    } else {
        println!("✗ Backup {id} is missing or does not match its checksum");
        Err("Backup verification failed".into())
    }
}

/// Restores the store from a backup.
pub fn restore(path: &Path, config: &CliConfig, id: &str, yes: bool) -> CommandResult {
    let id = parse_id(id)?;
    if !yes {
        return Err("Restore replaces the live store. Re-run with --yes to proceed.".into());
    }
    info!("Restoring store at {:?} from backup {}", path, id);

    let service = open_service(path, config)?;
    let backup = service.restore_backup(id)?;
    service.store().close()?;

    println!("✓ Restored backup {} ({})", backup.id, backup.name);
    println!("  Taken: {}", format_timestamp(&backup.created_at));
    Ok(())
}

/// Deletes a backup.
pub fn delete(path: &Path, config: &CliConfig, id: &str) -> CommandResult {
    let id = parse_id(id)?;
    let service = open_service(path, config)?;
    let deleted = service.delete_backup(id)?;
    service.store().close()?;

    if deleted {
        println!("✓ Deleted backup {id}");
        Ok(())
    } else {
        Err(format!("No backup with id {id}").into())
    }
}

/// Prunes automatic backups.
pub fn prune(path: &Path, config: &CliConfig, keep: Option<usize>) -> CommandResult {
    let service = open_service(path, config)?;
    let keep = keep.unwrap_or(service.config().keep_automatic);
    let deleted = service.prune_automatic(keep)?;
    service.store().close()?;

    println!("✓ Deleted {deleted} automatic backup(s), kept up to {keep}");
    Ok(())
}
