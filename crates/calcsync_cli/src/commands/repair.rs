//! Repair command implementation.

use super::{open_service, CommandResult};
use crate::config::CliConfig;
use std::path::Path;
use tracing::info;

/// Runs a full database repair.
pub fn run(path: &Path, config: &CliConfig, yes: bool) -> CommandResult {
    if !yes {
        return Err("Repair may delete rows. Re-run with --yes to proceed.".into());
    }
    info!("Repairing store at {:?}", path);

    let service = open_service(path, config)?;
    let report = service.repair_database()?;
    service.store().close()?;

    println!("Emergency backup: {}", report.emergency_backup.id);
    println!("  Path: {}", report.emergency_backup.file_path.display());
    println!("Issues fixed: {}", report.fixed);
    println!("Rows purged: {}", report.purged);
    if report.passed {
        println!("✓ Repair finished, corruption check passed");
        Ok(())
    } else {
        println!("✗ Corruption remains:");
        for issue in &report.remaining {
            println!("  {}", issue.description);
        }
        println!("Restore from a backup with `calcsync backup restore`.");
        Err("Repair incomplete".into())
    }
}
