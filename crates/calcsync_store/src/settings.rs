//! User settings and device identity.

use crate::error::StoreResult;
use crate::rows::{parse_json, parse_ts, to_json, ts};
use crate::store::LocalStore;
use calcsync_core::{DeviceId, DeviceInfo, UserSetting};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

impl LocalStore {
    /// Reads a setting.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::CorruptRow`] if the value is not JSON.
    pub fn get_setting(&self, key: &str) -> StoreResult<Option<UserSetting>> {
        self.with_connection(|conn| {
            let row: Option<(String, String)> = conn
                .query_row(
                    "SELECT value, updated_at FROM user_settings WHERE key = ?1",
                    [key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            row.map(|(value, updated_at)| {
                Ok(UserSetting {
                    key: key.to_string(),
                    value: parse_json("user_settings", "value", &value)?,
                    updated_at: parse_ts("user_settings", &updated_at)?,
                })
            })
            .transpose()
        })
    }

    /// Writes a setting.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn set_setting(&self, key: &str, value: &Value) -> StoreResult<()> {
        let now = self.now();
        let encoded = to_json(value)?;
        self.transaction(|tx| {
            tx.execute(
                "INSERT INTO user_settings (key, value, updated_at) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, encoded, ts(&now)],
            )?;
            Ok(())
        })
    }

    /// Deletes a setting. Returns true if it existed.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn delete_setting(&self, key: &str) -> StoreResult<bool> {
        self.transaction(|tx| {
            Ok(tx.execute("DELETE FROM user_settings WHERE key = ?1", [key])? > 0)
        })
    }

    /// All settings ordered by key.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::CorruptRow`] if any value is not JSON.
    pub fn list_settings(&self) -> StoreResult<Vec<UserSetting>> {
        self.with_connection(|conn| {
            let mut stmt =
                conn.prepare("SELECT key, value, updated_at FROM user_settings ORDER BY key")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|(key, value, updated_at)| {
                    Ok(UserSetting {
                        key,
                        value: parse_json("user_settings", "value", &value)?,
                        updated_at: parse_ts("user_settings", &updated_at)?,
                    })
                })
                .collect()
        })
    }

    /// The identity this device registered with, if any.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn get_device_info(&self) -> StoreResult<Option<DeviceInfo>> {
        self.with_connection(|conn| {
            Ok(conn
                .query_row(
                    "SELECT device_id, display_name, platform, app_version FROM device_info WHERE id = 1",
                    [],
                    |row| {
                        Ok(DeviceInfo {
                            device_id: DeviceId::new(row.get::<_, String>(0)?),
                            display_name: row.get(1)?,
                            platform: row.get(2)?,
                            app_version: row.get(3)?,
                        })
                    },
                )
                .optional()?)
        })
    }

    /// Stores this device's identity.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn set_device_info(&self, info: &DeviceInfo) -> StoreResult<()> {
        let now = self.now();
        self.transaction(|tx| {
            tx.execute(
                "INSERT INTO device_info (id, device_id, display_name, platform, app_version, updated_at) \
                 VALUES (1, ?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(id) DO UPDATE SET device_id = excluded.device_id, \
                 display_name = excluded.display_name, platform = excluded.platform, \
                 app_version = excluded.app_version, updated_at = excluded.updated_at",
                params![
                    info.device_id.as_str(),
                    info.display_name,
                    info.platform,
                    info.app_version,
                    ts(&now),
                ],
            )?;
            Ok(())
        })
    }
}
