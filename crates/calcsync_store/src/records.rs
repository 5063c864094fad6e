//! Entity-generic access to synchronizable records.
//!
//! The sync engine treats calculations and parameter sets the same way;
//! [`StoredRecord`] and the `*_record` methods dispatch on [`EntityType`] so
//! it does not have to.

use crate::error::StoreResult;
use crate::store::LocalStore;
use calcsync_core::{
    CalculationRecord, ClientId, DeviceId, EntityType, ParameterSet, SyncStatus, Timestamp,
};

/// A record of either synchronizable entity type.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredRecord {
    /// A saved calculation.
    Calculation(CalculationRecord),
    /// A saved parameter set.
    ParameterSet(ParameterSet),
}

impl StoredRecord {
    /// Entity kind.
    #[must_use]
    pub fn entity_type(&self) -> EntityType {
        match self {
            StoredRecord::Calculation(_) => EntityType::Calculation,
            StoredRecord::ParameterSet(_) => EntityType::ParameterSet,
        }
    }

    /// Local row id.
    #[must_use]
    pub fn local_id(&self) -> Option<i64> {
        match self {
            StoredRecord::Calculation(r) => r.id,
            StoredRecord::ParameterSet(r) => r.id,
        }
    }

    /// Client ID.
    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        match self {
            StoredRecord::Calculation(r) => &r.client_id,
            StoredRecord::ParameterSet(r) => &r.client_id,
        }
    }

    /// Originating device.
    #[must_use]
    pub fn device_id(&self) -> &DeviceId {
        match self {
            StoredRecord::Calculation(r) => &r.device_id,
            StoredRecord::ParameterSet(r) => &r.device_id,
        }
    }

    /// Sync status.
    #[must_use]
    pub fn sync_status(&self) -> SyncStatus {
        match self {
            StoredRecord::Calculation(r) => r.sync_status,
            StoredRecord::ParameterSet(r) => r.sync_status,
        }
    }

    /// Last modification, falling back to creation.
    #[must_use]
    pub fn effective_timestamp(&self) -> Timestamp {
        match self {
            StoredRecord::Calculation(r) => r.effective_timestamp(),
            StoredRecord::ParameterSet(r) => r.effective_timestamp(),
        }
    }

    /// `updated_at` as stored.
    #[must_use]
    pub fn updated_at(&self) -> Option<Timestamp> {
        match self {
            StoredRecord::Calculation(r) => r.updated_at,
            StoredRecord::ParameterSet(r) => r.updated_at,
        }
    }

    /// Last server version seen.
    #[must_use]
    pub fn server_timestamp(&self) -> Option<Timestamp> {
        match self {
            StoredRecord::Calculation(r) => r.server_timestamp,
            StoredRecord::ParameterSet(r) => r.server_timestamp,
        }
    }

    /// Returns true for built-in presets, which never leave the device.
    #[must_use]
    pub fn is_preset(&self) -> bool {
        matches!(self, StoredRecord::ParameterSet(r) if r.is_preset)
    }
}

impl From<CalculationRecord> for StoredRecord {
    fn from(record: CalculationRecord) -> Self {
        StoredRecord::Calculation(record)
    }
}

impl From<ParameterSet> for StoredRecord {
    fn from(set: ParameterSet) -> Self {
        StoredRecord::ParameterSet(set)
    }
}

impl LocalStore {
    /// Saves a new record of either type. Returns the local row id.
    ///
    /// # Errors
    ///
    /// Returns validation or SQLite errors.
    pub fn save_record(&self, record: &StoredRecord) -> StoreResult<i64> {
        match record {
            StoredRecord::Calculation(r) => self.save_calculation(r),
            StoredRecord::ParameterSet(r) => self.save_parameter_set(r),
        }
    }

    /// Finds a record by client ID.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::CorruptRow`] if the row cannot be decoded.
    pub fn find_record(
        &self,
        entity_type: EntityType,
        client_id: &ClientId,
    ) -> StoreResult<Option<StoredRecord>> {
        Ok(match entity_type {
            EntityType::Calculation => self.find_calculation(client_id)?.map(StoredRecord::from),
            EntityType::ParameterSet => self.find_parameter_set(client_id)?.map(StoredRecord::from),
        })
    }

    /// Records with unsynced local changes. Presets are never listed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::CorruptRow`] if any row cannot be decoded.
    pub fn list_pending_records(&self, entity_type: EntityType) -> StoreResult<Vec<StoredRecord>> {
        Ok(match entity_type {
            EntityType::Calculation => self
                .list_pending_calculations()?
                .into_iter()
                .map(StoredRecord::from)
                .collect(),
            EntityType::ParameterSet => self
                .list_pending_parameter_sets()?
                .into_iter()
                .map(StoredRecord::from)
                .collect(),
        })
    }

    /// Updates an existing record in place.
    ///
    /// # Errors
    ///
    /// See [`LocalStore::update_calculation`] and
    /// [`LocalStore::update_parameter_set`].
    pub fn update_record(&self, record: &StoredRecord) -> StoreResult<()> {
        match record {
            StoredRecord::Calculation(r) => self.update_calculation(r),
            StoredRecord::ParameterSet(r) => self.update_parameter_set(r),
        }
    }

    /// Replaces the row with the record's client ID, or inserts it.
    ///
    /// # Errors
    ///
    /// See [`LocalStore::upsert_calculation`] and
    /// [`LocalStore::upsert_parameter_set`].
    pub fn upsert_record(&self, record: &StoredRecord) -> StoreResult<i64> {
        match record {
            StoredRecord::Calculation(r) => self.upsert_calculation(r),
            StoredRecord::ParameterSet(r) => self.upsert_parameter_set(r),
        }
    }

    /// Deletes every row with the client ID. Returns true if any existed.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn delete_record(
        &self,
        entity_type: EntityType,
        client_id: &ClientId,
    ) -> StoreResult<bool> {
        match entity_type {
            EntityType::Calculation => self.delete_calculation_by_client_id(client_id),
            EntityType::ParameterSet => self.delete_parameter_set_by_client_id(client_id),
        }
    }

    /// Sets the sync status of a record.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::NotFound`] if no row has the client ID.
    pub fn set_record_status(
        &self,
        entity_type: EntityType,
        client_id: &ClientId,
        status: SyncStatus,
    ) -> StoreResult<()> {
        match entity_type {
            EntityType::Calculation => self.set_calculation_status(client_id, status),
            EntityType::ParameterSet => self.set_parameter_set_status(client_id, status),
        }
    }

    /// Records a successful upload. Returns true if the row became `synced`.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn mark_record_synced(
        &self,
        entity_type: EntityType,
        client_id: &ClientId,
        server_id: &str,
        server_timestamp: Timestamp,
        uploaded_version: Option<Timestamp>,
    ) -> StoreResult<bool> {
        match entity_type {
            EntityType::Calculation => self.mark_calculation_synced(
                client_id,
                server_id,
                server_timestamp,
                uploaded_version,
            ),
            EntityType::ParameterSet => self.mark_parameter_set_synced(
                client_id,
                server_id,
                server_timestamp,
                uploaded_version,
            ),
        }
    }

    /// Moves `failed` records of every type back to `pending`.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn reset_failed_records(&self) -> StoreResult<usize> {
        Ok(self.reset_failed_calculations()? + self.reset_failed_parameter_sets()?)
    }

    /// Moves records left `syncing` by an interrupted upload back to
    /// `pending`. Returns how many.
    ///
    /// Only call this while no upload is in flight.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn recover_syncing_records(&self) -> StoreResult<usize> {
        self.transaction(|tx| {
            let mut count = 0;
            for table in ["calculations", "parameter_sets"] {
                count += tx.execute(
                    &format!(
                        "UPDATE {table} SET sync_status = 'pending' WHERE sync_status = 'syncing'"
                    ),
                    [],
                )?;
            }
            Ok(count)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calcsync_core::{CalculationType, Clock, ManualClock};
    use serde_json::json;

    #[test]
    fn dispatch_by_entity_type() {
        let clock = ManualClock::at_millis(0);
        let store = LocalStore::open_in_memory().unwrap();
        let calc = CalculationRecord::new(
            CalculationType::CableSizing,
            json!({"current": 32}),
            json!({"size_mm2": 6}),
            DeviceId::new("d1"),
            clock.now(),
        );
        let set = ParameterSet::new(
            "Site defaults",
            CalculationType::CableSizing,
            json!({"current": 32}),
            DeviceId::new("d1"),
            clock.now(),
        );
        let preset = ParameterSet::new(
            "Built-in",
            CalculationType::VoltageDrop,
            json!({}),
            DeviceId::new("d1"),
            clock.now(),
        )
        .as_preset();
        for record in [calc.clone().into(), set.clone().into(), preset.into()] {
            store.save_record(&record).unwrap();
        }

        let found = store
            .find_record(EntityType::Calculation, &calc.client_id)
            .unwrap()
            .unwrap();
        assert_eq!(found.entity_type(), EntityType::Calculation);
        assert!(found.local_id().is_some());
        assert!(store
            .find_record(EntityType::ParameterSet, &calc.client_id)
            .unwrap()
            .is_none());

        assert_eq!(store.list_pending_records(EntityType::Calculation).unwrap().len(), 1);
        let pending_sets = store.list_pending_records(EntityType::ParameterSet).unwrap();
        assert_eq!(pending_sets.len(), 1);
        assert!(!pending_sets[0].is_preset());

        store
            .set_record_status(EntityType::ParameterSet, &set.client_id, SyncStatus::Failed)
            .unwrap();
        assert_eq!(store.reset_failed_records().unwrap(), 1);

        store
            .set_record_status(EntityType::Calculation, &calc.client_id, SyncStatus::Syncing)
            .unwrap();
        assert!(store.list_pending_records(EntityType::Calculation).unwrap().is_empty());
        assert_eq!(store.recover_syncing_records().unwrap(), 1);
        assert_eq!(store.list_pending_records(EntityType::Calculation).unwrap().len(), 1);
        assert_eq!(store.recover_syncing_records().unwrap(), 0);

        assert!(store.delete_record(EntityType::ParameterSet, &set.client_id).unwrap());
    }
}
