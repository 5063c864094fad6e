//! Inspect command implementation.

use super::{open_store, CommandResult};
use calcsync_core::{format_timestamp, EntityType};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Store statistics.
#[derive(Debug, Serialize)]
struct StoreInfo {
    path: String,
    schema_version: u32,
    journal_mode: String,
    tables: BTreeMap<String, u64>,
    queue: BTreeMap<String, u64>,
    checkpoints: BTreeMap<String, Option<String>>,
    open_conflicts: usize,
    open_issues: usize,
    backups: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> CommandResult {
    let store = open_store(path)?;

    let mut checkpoints = BTreeMap::new();
    for entity in EntityType::ALL {
        let at = store.get_checkpoint(*entity)?;
        checkpoints.insert(entity.to_string(), at.as_ref().map(format_timestamp));
    }

    let info = StoreInfo {
        path: path.display().to_string(),
        schema_version: store.schema_version()?,
        journal_mode: store.journal_mode()?,
        tables: store.table_counts()?,
        queue: store
            .queue_counts()?
            .into_iter()
            .map(|(status, count)| (status.to_string(), count))
            .collect(),
        checkpoints,
        open_conflicts: store.list_conflicts(true)?.len(),
        open_issues: store.list_issues(true)?.len(),
        backups: store.list_backups()?.len(),
    };
    store.close()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&info)?),
        "text" => print_text(&info),
        other => return Err(format!("unknown format: {other}").into()),
    }
    Ok(())
}

fn print_text(info: &StoreInfo) {
    println!("Store: {}", info.path);
    println!("  Schema version: {}", info.schema_version);
    println!("  Journal mode: {}", info.journal_mode);
    println!();
    println!("Tables:");
    for (table, count) in &info.tables {
        println!("  {table:<20} {count:>8}");
    }
    println!();
    println!("Offline queue:");
    if info.queue.is_empty() {
        println!("  (empty)");
    }
    for (status, count) in &info.queue {
        println!("  {status:<20} {count:>8}");
    }
    println!();
    println!("Sync checkpoints:");
    for (entity, at) in &info.checkpoints {
        println!("  {entity:<20} {}", at.as_deref().unwrap_or("never"));
    }
    println!();
    println!("Open conflicts: {}", info.open_conflicts);
    println!("Open integrity issues: {}", info.open_issues);
    println!("Backups: {}", info.backups);
}
