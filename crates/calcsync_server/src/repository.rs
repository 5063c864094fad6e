//! Relational persistence for the server.
//!
//! Rows are keyed on `(owner, entity_type, client_id)`, so replaying an
//! upload can never create a second row. Every accepted write gets a server
//! timestamp strictly greater than any issued before.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use calcsync_core::{
    add_duration, format_timestamp, parse_timestamp, ClientId, DeviceId, EntityType, Timestamp,
};
use calcsync_protocol::{DeviceRegistration, RecordSnapshot, UploadResponse};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use std::time::Duration;
use uuid::Uuid;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    owner TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    client_id TEXT NOT NULL,
    server_id TEXT NOT NULL,
    device_id TEXT NOT NULL,
    user_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT,
    server_timestamp TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    data TEXT NOT NULL,
    PRIMARY KEY (owner, entity_type, client_id)
);
CREATE INDEX IF NOT EXISTS idx_records_changes
    ON records (owner, entity_type, server_timestamp);
CREATE TABLE IF NOT EXISTS devices (
    owner TEXT NOT NULL,
    device_id TEXT NOT NULL,
    display_name TEXT NOT NULL,
    platform TEXT NOT NULL,
    app_version TEXT NOT NULL,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    PRIMARY KEY (owner, device_id)
);
";

const RECORD_COLUMNS: &str = "entity_type, client_id, server_id, device_id, user_id, \
     created_at, updated_at, server_timestamp, deleted, data";

/// Result of an upload.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    /// The record was stored, or was already stored with the same content.
    Stored(UploadResponse),
    /// The row has moved past the client's base version.
    Conflict(Box<RecordSnapshot>),
}

/// Changed rows plus the time the listing covers.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeSet {
    /// Rows changed after `since`, oldest first.
    pub records: Vec<RecordSnapshot>,
    /// Every later write is stamped after this.
    pub server_time: Timestamp,
}

struct Inner {
    conn: Connection,
    last_issued: Option<Timestamp>,
}

impl Inner {
    /// Next server timestamp: `now`, or 1 ms past the last one issued.
    fn next_timestamp(&mut self, now: Timestamp) -> Timestamp {
        let ts = match self.last_issued {
            Some(last) if last >= now => add_duration(last, Duration::from_millis(1)),
            _ => now,
        };
        self.last_issued = Some(ts);
        ts
    }

    /// Marks `now` as covered by a listing, so later writes sort after it.
    fn reserve(&mut self, now: Timestamp) -> Timestamp {
        let ts = self.last_issued.map_or(now, |last| last.max(now));
        self.last_issued = Some(ts);
        ts
    }

    fn find(
        &self,
        owner: &str,
        entity_type: EntityType,
        client_id: &ClientId,
    ) -> ServerResult<Option<RecordSnapshot>> {
        let raw = self
            .conn
            .query_row(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM records \
                     WHERE owner = ?1 AND entity_type = ?2 AND client_id = ?3"
                ),
                params![owner, entity_type.as_str(), client_id.to_string()],
                RawRecord::from_row,
            )
            .optional()?;
        raw.map(RawRecord::decode).transpose()
    }

    fn write(&self, owner: &str, record: &RecordSnapshot) -> ServerResult<()> {
        let data = serde_json::to_string(&record.data)
            .map_err(|e| ServerError::Internal(format!("encoding record data: {e}")))?;
        self.conn.execute(
            "INSERT INTO records (owner, entity_type, client_id, server_id, device_id, user_id, \
                 created_at, updated_at, server_timestamp, deleted, data) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
             ON CONFLICT (owner, entity_type, client_id) DO UPDATE SET \
                 server_id = excluded.server_id, device_id = excluded.device_id, \
                 user_id = excluded.user_id, created_at = excluded.created_at, \
                 updated_at = excluded.updated_at, server_timestamp = excluded.server_timestamp, \
                 deleted = excluded.deleted, data = excluded.data",
            params![
                owner,
                record.entity_type.as_str(),
                record.client_id.to_string(),
                record.server_id.clone().unwrap_or_default(),
                record.device_id.as_str(),
                record.user_id,
                format_timestamp(&record.created_at),
                record.updated_at.as_ref().map(format_timestamp),
                record.server_timestamp.as_ref().map(format_timestamp),
                record.deleted,
                data,
            ],
        )?;
        Ok(())
    }
}

/// Column values of one `records` row, decoded outside the rusqlite closure.
struct RawRecord {
    entity_type: String,
    client_id: String,
    server_id: String,
    device_id: String,
    user_id: Option<String>,
    created_at: String,
    updated_at: Option<String>,
    server_timestamp: String,
    deleted: bool,
    data: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            entity_type: row.get(0)?,
            client_id: row.get(1)?,
            server_id: row.get(2)?,
            device_id: row.get(3)?,
            user_id: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
            server_timestamp: row.get(7)?,
            deleted: row.get(8)?,
            data: row.get(9)?,
        })
    }

    fn decode(self) -> ServerResult<RecordSnapshot> {
        let corrupt = |what: &str, e: &dyn std::fmt::Display| {
            ServerError::CorruptRow(format!("records {}: {what}: {e}", self.client_id))
        };
        let data: Map<String, Value> =
            serde_json::from_str(&self.data).map_err(|e| corrupt("data", &e))?;
        Ok(RecordSnapshot {
            entity_type: self.entity_type.parse().map_err(|e| corrupt("entity_type", &e))?,
            client_id: self.client_id.parse().map_err(|e| corrupt("client_id", &e))?,
            server_id: Some(self.server_id.clone()),
            device_id: DeviceId::new(self.device_id.clone()),
            user_id: self.user_id.clone(),
            created_at: parse_timestamp(&self.created_at).map_err(|e| corrupt("created_at", &e))?,
            updated_at: self
                .updated_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()
                .map_err(|e| corrupt("updated_at", &e))?,
            server_timestamp: Some(
                parse_timestamp(&self.server_timestamp)
                    .map_err(|e| corrupt("server_timestamp", &e))?,
            ),
            deleted: self.deleted,
            data,
        })
    }
}

/// The server's record and device tables.
pub struct RecordRepository {
    inner: Mutex<Inner>,
}

impl RecordRepository {
    /// Opens the database named by `config`, creating tables as needed.
    ///
    /// # Errors
    ///
    /// Returns database errors.
    pub fn open(config: &ServerConfig) -> ServerResult<Self> {
        let conn = match &config.database_path {
            Some(path) => {
                let conn = Connection::open(path)?;
                let _mode: String =
                    conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
                conn
            }
            None => Connection::open_in_memory()?,
        };
        conn.execute_batch(SCHEMA)?;
        let last: Option<String> =
            conn.query_row("SELECT MAX(server_timestamp) FROM records", [], |row| row.get(0))?;
        let last_issued = last
            .map(|text| parse_timestamp(&text))
            .transpose()
            .map_err(|e| ServerError::CorruptRow(format!("records server_timestamp: {e}")))?;
        tracing::debug!(path = ?config.database_path, "server database open");
        Ok(Self {
            inner: Mutex::new(Inner { conn, last_issued }),
        })
    }

    /// Stores an upload based on `base`, the server version the client saw.
    ///
    /// A replay with unchanged content is acknowledged with the stored
    /// version. An upload based on the current version replaces the row,
    /// reviving it if it was a tombstone.
    ///
    /// # Errors
    ///
    /// Returns database errors.
    pub fn upsert(
        &self,
        owner: &str,
        record: &RecordSnapshot,
        base: Option<Timestamp>,
        now: Timestamp,
    ) -> ServerResult<UpsertOutcome> {
        let mut inner = self.inner.lock();
        let current = inner.find(owner, record.entity_type, &record.client_id)?;

        let server_id = match &current {
            Some(current) if current.same_content(record) => {
                return Ok(UpsertOutcome::Stored(UploadResponse {
                    server_id: current.server_id.clone().unwrap_or_default(),
                    server_timestamp: current.server_timestamp.unwrap_or(current.created_at),
                    created: false,
                }));
            }
            Some(current) if base != current.server_timestamp => {
                return Ok(UpsertOutcome::Conflict(Box::new(current.clone())));
            }
            Some(current) => current.server_id.clone(),
            None => None,
        };

        let created = current.is_none();
        let mut stored = record.clone();
        stored.server_id = Some(server_id.unwrap_or_else(|| Uuid::new_v4().to_string()));
        stored.server_timestamp = Some(inner.next_timestamp(now));
        inner.write(owner, &stored)?;

        Ok(UpsertOutcome::Stored(UploadResponse {
            server_id: stored.server_id.unwrap_or_default(),
            server_timestamp: stored.server_timestamp.unwrap_or(now),
            created,
        }))
    }

    /// Lists rows changed strictly after `since`, at most `limit`.
    ///
    /// When the listing is cut short, `server_time` is the timestamp of the
    /// last row returned, so the next listing resumes after it.
    ///
    /// # Errors
    ///
    /// Returns database errors and [`ServerError::CorruptRow`].
    pub fn changed_since(
        &self,
        owner: &str,
        entity_type: EntityType,
        since: Option<Timestamp>,
        limit: usize,
        now: Timestamp,
    ) -> ServerResult<ChangeSet> {
        let mut inner = self.inner.lock();
        let since = since.as_ref().map(format_timestamp).unwrap_or_default();
        let limit_sql = i64::try_from(limit).unwrap_or(i64::MAX);
        let raws = {
            let mut stmt = inner.conn.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM records \
                 WHERE owner = ?1 AND entity_type = ?2 AND server_timestamp > ?3 \
                 ORDER BY server_timestamp ASC LIMIT ?4"
            ))?;
            let rows = stmt.query_map(
                params![owner, entity_type.as_str(), since, limit_sql],
                RawRecord::from_row,
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        let records = raws
            .into_iter()
            .map(RawRecord::decode)
            .collect::<ServerResult<Vec<_>>>()?;

        let server_time = match records.last() {
            Some(last) if records.len() >= limit => last.server_timestamp.unwrap_or(now),
            _ => inner.reserve(now),
        };
        Ok(ChangeSet {
            records,
            server_time,
        })
    }

    /// Turns a row into a tombstone. Returns false if no row exists.
    ///
    /// Deleting a tombstone again succeeds without a new version.
    ///
    /// # Errors
    ///
    /// Returns database errors.
    pub fn tombstone(
        &self,
        owner: &str,
        entity_type: EntityType,
        client_id: &ClientId,
        now: Timestamp,
    ) -> ServerResult<bool> {
        let mut inner = self.inner.lock();
        let Some(mut current) = inner.find(owner, entity_type, client_id)? else {
            return Ok(false);
        };
        if current.deleted {
            return Ok(true);
        }
        current.deleted = true;
        current.updated_at = Some(now);
        current.server_timestamp = Some(inner.next_timestamp(now));
        inner.write(owner, &current)?;
        Ok(true)
    }

    /// The stored row, tombstones included.
    ///
    /// # Errors
    ///
    /// Returns database errors and [`ServerError::CorruptRow`].
    pub fn get(
        &self,
        owner: &str,
        entity_type: EntityType,
        client_id: &ClientId,
    ) -> ServerResult<Option<RecordSnapshot>> {
        self.inner.lock().find(owner, entity_type, client_id)
    }

    /// Registers or refreshes a device.
    ///
    /// # Errors
    ///
    /// Returns database errors.
    pub fn register_device(
        &self,
        owner: &str,
        device: &DeviceRegistration,
        now: Timestamp,
    ) -> ServerResult<()> {
        let now = format_timestamp(&now);
        self.inner.lock().conn.execute(
            "INSERT INTO devices (owner, device_id, display_name, platform, app_version, \
                 first_seen, last_seen) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6) \
             ON CONFLICT (owner, device_id) DO UPDATE SET \
                 display_name = excluded.display_name, platform = excluded.platform, \
                 app_version = excluded.app_version, last_seen = excluded.last_seen",
            params![
                owner,
                device.device_id.as_str(),
                device.display_name,
                device.platform,
                device.app_version,
                now,
            ],
        )?;
        Ok(())
    }

    /// Number of rows for an owner, tombstones included.
    ///
    /// # Errors
    ///
    /// Returns database errors.
    pub fn record_count(&self, owner: &str) -> ServerResult<u64> {
        let count: i64 = self.inner.lock().conn.query_row(
            "SELECT COUNT(*) FROM records WHERE owner = ?1",
            params![owner],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Number of registered devices for an owner.
    ///
    /// # Errors
    ///
    /// Returns database errors.
    pub fn device_count(&self, owner: &str) -> ServerResult<u64> {
        let count: i64 = self.inner.lock().conn.query_row(
            "SELECT COUNT(*) FROM devices WHERE owner = ?1",
            params![owner],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calcsync_core::{Clock, ManualClock};
    use serde_json::json;

    fn snapshot(client_id: ClientId, notes: &str, at: Timestamp) -> RecordSnapshot {
        let mut data = Map::new();
        data.insert("notes".into(), json!(notes));
        RecordSnapshot {
            entity_type: EntityType::Calculation,
            client_id,
            server_id: None,
            device_id: DeviceId::new("phone"),
            user_id: None,
            created_at: at,
            updated_at: None,
            server_timestamp: None,
            deleted: false,
            data,
        }
    }

    fn stored(outcome: UpsertOutcome) -> UploadResponse {
        match outcome {
            UpsertOutcome::Stored(ack) => ack,
            UpsertOutcome::Conflict(current) => panic!("unexpected conflict with {current:?}"),
        }
    }

    #[test]
    fn replayed_upload_keeps_one_row() {
        let clock = ManualClock::at_millis(1_000);
        let repo = RecordRepository::open(&ServerConfig::in_memory()).unwrap();
        let record = snapshot(ClientId::new(), "a", clock.now());

        let first = stored(repo.upsert("", &record, None, clock.now()).unwrap());
        assert!(first.created);
        let replay = stored(repo.upsert("", &record, None, clock.now()).unwrap());
        assert!(!replay.created);
        assert_eq!(replay, UploadResponse { created: false, ..first });
        assert_eq!(repo.record_count("").unwrap(), 1);
    }

    #[test]
    fn stale_base_conflicts() {
        let clock = ManualClock::at_millis(1_000);
        let repo = RecordRepository::open(&ServerConfig::in_memory()).unwrap();
        let client_id = ClientId::new();
        let v1 = stored(
            repo.upsert("", &snapshot(client_id, "a", clock.now()), None, clock.now())
                .unwrap(),
        );

        let v2 = stored(
            repo.upsert(
                "",
                &snapshot(client_id, "b", clock.now()),
                Some(v1.server_timestamp),
                clock.now(),
            )
            .unwrap(),
        );
        assert!(v2.server_timestamp > v1.server_timestamp);
        assert_eq!(v2.server_id, v1.server_id);

        let outcome = repo
            .upsert(
                "",
                &snapshot(client_id, "c", clock.now()),
                Some(v1.server_timestamp),
                clock.now(),
            )
            .unwrap();
        let UpsertOutcome::Conflict(current) = outcome else {
            panic!("expected a conflict");
        };
        assert_eq!(current.data["notes"], json!("b"));
        assert_eq!(current.server_timestamp, Some(v2.server_timestamp));
    }

    #[test]
    fn listings_never_miss_later_writes() {
        let clock = ManualClock::at_millis(1_000);
        let repo = RecordRepository::open(&ServerConfig::in_memory()).unwrap();
        let listing = repo
            .changed_since("", EntityType::Calculation, None, 100, clock.now())
            .unwrap();
        assert!(listing.records.is_empty());

        // Same instant as the listing; must still sort after it.
        repo.upsert("", &snapshot(ClientId::new(), "a", clock.now()), None, clock.now())
            .unwrap();
        let next = repo
            .changed_since(
                "",
                EntityType::Calculation,
                Some(listing.server_time),
                100,
                clock.now(),
            )
            .unwrap();
        assert_eq!(next.records.len(), 1);
    }

    #[test]
    fn truncated_listing_resumes() {
        let clock = ManualClock::at_millis(1_000);
        let repo = RecordRepository::open(&ServerConfig::in_memory()).unwrap();
        for i in 0..5 {
            let record = snapshot(ClientId::new(), &i.to_string(), clock.now());
            repo.upsert("", &record, None, clock.now()).unwrap();
        }
        let first = repo
            .changed_since("", EntityType::Calculation, None, 3, clock.now())
            .unwrap();
        assert_eq!(first.records.len(), 3);
        let rest = repo
            .changed_since("", EntityType::Calculation, Some(first.server_time), 3, clock.now())
            .unwrap();
        assert_eq!(rest.records.len(), 2);
    }

    #[test]
    fn tombstones_and_owners() {
        let clock = ManualClock::at_millis(1_000);
        let repo = RecordRepository::open(&ServerConfig::in_memory()).unwrap();
        let client_id = ClientId::new();
        let ack = stored(
            repo.upsert("alice", &snapshot(client_id, "a", clock.now()), None, clock.now())
                .unwrap(),
        );
        assert!(repo.get("bob", EntityType::Calculation, &client_id).unwrap().is_none());
        assert!(!repo
            .tombstone("bob", EntityType::Calculation, &client_id, clock.now())
            .unwrap());

        assert!(repo
            .tombstone("alice", EntityType::Calculation, &client_id, clock.now())
            .unwrap());
        let row = repo.get("alice", EntityType::Calculation, &client_id).unwrap().unwrap();
        assert!(row.deleted);
        assert!(row.server_timestamp > Some(ack.server_timestamp));

        // An upload based on the tombstone revives the row.
        let revived = stored(
            repo.upsert(
                "alice",
                &snapshot(client_id, "again", clock.now()),
                row.server_timestamp,
                clock.now(),
            )
            .unwrap(),
        );
        assert!(!revived.created);
        let row = repo.get("alice", EntityType::Calculation, &client_id).unwrap().unwrap();
        assert!(!row.deleted);
    }

    #[test]
    fn devices_upsert() {
        let clock = ManualClock::at_millis(1_000);
        let repo = RecordRepository::open(&ServerConfig::in_memory()).unwrap();
        let device = DeviceRegistration {
            device_id: DeviceId::new("phone"),
            display_name: "Phone".into(),
            platform: "android".into(),
            app_version: "1.0.0".into(),
        };
        repo.register_device("", &device, clock.now()).unwrap();
        repo.register_device("", &device, clock.now()).unwrap();
        assert_eq!(repo.device_count("").unwrap(), 1);
    }

    #[test]
    fn file_database_remembers_last_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig::new(dir.path().join("server.db"));
        let clock = ManualClock::at_millis(5_000);
        let ack = {
            let repo = RecordRepository::open(&config).unwrap();
            stored(
                repo.upsert("", &snapshot(ClientId::new(), "a", clock.now()), None, clock.now())
                    .unwrap(),
            )
        };

        // A clock that went backwards still yields later versions.
        let repo = RecordRepository::open(&config).unwrap();
        let earlier = ManualClock::at_millis(1_000).now();
        let next = stored(
            repo.upsert("", &snapshot(ClientId::new(), "b", earlier), None, earlier)
                .unwrap(),
        );
        assert!(next.server_timestamp > ack.server_timestamp);
    }
}
