//! Maintain command implementation.

use super::{open_service, CommandResult};
use crate::config::CliConfig;
use calcsync_core::{Scheduler, SystemClock};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::info;

/// Runs the periodic integrity check and automatic backups on a
/// scheduler ticked every `tick_secs`, forever or for `ticks` ticks.
pub fn run(path: &Path, config: &CliConfig, tick_secs: u64, ticks: Option<u64>) -> CommandResult {
    let service = Arc::new(open_service(path, config)?);
    let mut scheduler = Scheduler::new(SystemClock::shared());
    let tasks = service.register_periodic(&mut scheduler);
    if tasks.is_empty() {
        return Err("No maintenance tasks configured".into());
    }
    info!(tasks = ?tasks, tick_secs, "maintenance started");

    let tick = Duration::from_secs(tick_secs.max(1));
    let mut count = 0;
    while ticks.map_or(true, |limit| count < limit) {
        thread::sleep(tick);
        let ran = scheduler.run_due();
        if !ran.is_empty() {
            info!(tasks = ?ran, "maintenance tasks ran");
        }
        count += 1;
    }

    service.store().close()?;
    info!(ticks = count, "maintenance stopped");
    Ok(())
}
