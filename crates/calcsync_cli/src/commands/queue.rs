//! Offline queue commands.

use super::{open_store, parse_id, CommandResult};
use calcsync_core::{format_timestamp, Clock, QueueStatus};
use std::path::Path;

/// Prints item counts per status.
pub fn stats(path: &Path) -> CommandResult {
    let store = open_store(path)?;
    let counts = store.queue_counts()?;
    let blocked = store.blocked_queue_item_count()?;
    store.close()?;

    for status in QueueStatus::ALL {
        let count = counts.get(status).copied().unwrap_or(0);
        println!("{:<12} {count:>8}", status.as_str());
    }
    println!("{:<12} {blocked:>8}", "blocked");
    Ok(())
}

/// Lists queue items in drain order.
pub fn list(path: &Path, status: Option<&str>) -> CommandResult {
    let status: Option<QueueStatus> = status.map(str::parse).transpose()?;
    let store = open_store(path)?;
    let items = store.list_queue_items(status)?;
    store.close()?;

    if items.is_empty() {
        println!("Queue is empty");
    }
    for item in items {
        println!(
            "{}  {:<10} {:<8} {:<13} {}  retries {}/{}  due {}",
            item.id,
            item.status.as_str(),
            item.priority.as_str(),
            item.entity_type.as_str(),
            item.operation.as_str(),
            item.retry_count,
            item.max_retries,
            format_timestamp(&item.scheduled_at)
        );
        if let Some(dep) = item.depends_on {
            println!("    depends on {dep}");
        }
        if let Some(error) = &item.last_error {
            println!("    last error: {error}");
        }
    }
    Ok(())
}

/// Moves failed items back to pending.
pub fn retry(path: &Path, id: Option<&str>) -> CommandResult {
    let id = id.map(parse_id).transpose()?;
    let store = open_store(path)?;
    let now = store.clock().now();
    let reset = store.reset_failed_queue_items(id.as_ref(), now)?;
    store.close()?;

    println!("✓ {reset} failed item(s) moved back to pending");
    Ok(())
}
