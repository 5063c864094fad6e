//! Local-first write path.
//!
//! Every write lands in the local store first and fails only if that write
//! fails. The remote write is queued afterwards; a queue failure is logged
//! and left to the next sync pass, which uploads any `pending` row anyway.

use crate::error::SyncResult;
use crate::queue::OfflineQueueManager;
use calcsync_core::{
    CalculationPatch, CalculationRecord, ClientId, EntityType, NewQueueItem, ParameterSet,
    ParameterSetPatch, QueueOperation, SyncStatus,
};
use calcsync_store::LocalStore;
use std::sync::Arc;

/// Writes records locally and queues them for upload.
pub struct LocalFirstWriter {
    store: Arc<LocalStore>,
    queue: Arc<OfflineQueueManager>,
}

impl LocalFirstWriter {
    /// Creates a writer over a store and its queue.
    pub fn new(store: Arc<LocalStore>, queue: Arc<OfflineQueueManager>) -> Self {
        Self { store, queue }
    }

    /// Saves a new calculation. Returns it with its local id set.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SyncError::Validation`] for an invalid record and store
    /// errors from the local write.
    pub fn save_calculation(&self, mut record: CalculationRecord) -> SyncResult<CalculationRecord> {
        record.validate()?;
        record.sync_status = SyncStatus::Pending;
        let id = self.store.save_calculation(&record)?;
        record.id = Some(id);
        self.queue_write(QueueOperation::Create, EntityType::Calculation, &record.client_id);
        Ok(record)
    }

    /// Applies a partial update to a calculation and marks it for upload.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SyncError::Validation`] when the result would be invalid and
    /// store errors, including `NotFound` for an unknown id.
    pub fn update_calculation(
        &self,
        id: i64,
        mut patch: CalculationPatch,
    ) -> SyncResult<CalculationRecord> {
        patch.updated_at = Some(self.store.clock().now());
        patch.sync_status = Some(SyncStatus::Pending);
        let record = self.store.update_calculation_fields(id, &patch)?;
        self.queue_write(QueueOperation::Update, EntityType::Calculation, &record.client_id);
        Ok(record)
    }

    /// Saves a new parameter set. Returns it with its local id set.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SyncError::Validation`] for an invalid set and store errors.
    pub fn save_parameter_set(&self, mut set: ParameterSet) -> SyncResult<ParameterSet> {
        set.validate()?;
        if set.is_preset {
            // Presets ship with the app and never sync.
            set.sync_status = SyncStatus::Synced;
            let id = self.store.save_parameter_set(&set)?;
            set.id = Some(id);
            return Ok(set);
        }
        set.sync_status = SyncStatus::Pending;
        let id = self.store.save_parameter_set(&set)?;
        set.id = Some(id);
        self.queue_write(QueueOperation::Create, EntityType::ParameterSet, &set.client_id);
        Ok(set)
    }

    /// Applies a partial update to a parameter set and marks it for upload.
    ///
    /// # Errors
    ///
    /// Returns store errors, including `PresetImmutable` for presets.
    pub fn update_parameter_set(
        &self,
        id: i64,
        mut patch: ParameterSetPatch,
    ) -> SyncResult<ParameterSet> {
        patch.updated_at = Some(self.store.clock().now());
        patch.sync_status = Some(SyncStatus::Pending);
        let set = self.store.update_parameter_set_fields(id, &patch)?;
        self.queue_write(QueueOperation::Update, EntityType::ParameterSet, &set.client_id);
        Ok(set)
    }

    /// Deletes a record locally and queues the remote delete.
    ///
    /// Returns false if no local row had the client id; the remote delete is
    /// queued regardless.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn delete(&self, entity_type: EntityType, client_id: &ClientId) -> SyncResult<bool> {
        let removed = self.store.delete_record(entity_type, client_id)?;
        self.queue_write(QueueOperation::Delete, entity_type, client_id);
        Ok(removed)
    }

    fn queue_write(
        &self,
        operation: QueueOperation,
        entity_type: EntityType,
        client_id: &ClientId,
    ) {
        let item = NewQueueItem::new(operation, entity_type, client_id.to_string());
        match self.queue.enqueue(item) {
            Ok(id) => tracing::debug!(
                queue_item = %id,
                operation = %operation,
                entity = %entity_type,
                client_id = %client_id,
                "remote write queued"
            ),
            Err(err) => tracing::warn!(
                operation = %operation,
                client_id = %client_id,
                error = %err,
                "could not queue remote write; the next sync pass picks it up"
            ),
        }
    }
}
