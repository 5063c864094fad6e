//! PRAGMA configuration applied to every connection.

use crate::config::StoreConfig;
use crate::error::StoreResult;
use rusqlite::Connection;

/// Applies durability and safety pragmas.
pub(crate) fn apply_pragmas(conn: &Connection, config: &StoreConfig) -> StoreResult<()> {
    conn.busy_timeout(config.busy_timeout)?;
    if config.wal_mode && config.path.is_some() {
        // journal_mode returns the resulting mode as a row.
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    }
    conn.execute_batch(
        "
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA cache_size = -16000;
        ",
    )?;
    Ok(())
}

/// Returns the current journal mode.
pub(crate) fn journal_mode(conn: &Connection) -> StoreResult<String> {
    Ok(conn.pragma_query_value(None, "journal_mode", |row| row.get(0))?)
}
