//! Request handlers for sync endpoints.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::repository::{RecordRepository, UpsertOutcome};
use calcsync_core::{CalculationRecord, ClientId, EntityType, ParameterSet, SharedClock, Timestamp};
use calcsync_protocol::{
    DeviceRegistration, DownloadResponse, RecordSnapshot, Syncable, UploadRequest,
};
use std::sync::Arc;

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Record and device tables.
    pub repository: Arc<RecordRepository>,
    /// Source of server time.
    pub clock: SharedClock,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(
        config: ServerConfig,
        repository: Arc<RecordRepository>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config,
            repository,
            clock,
        }
    }
}

/// Handler for sync requests. `owner` scopes every operation to one user;
/// it is empty when authentication is off.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles an upload to `entity_type`'s collection.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidRequest`] if the record belongs to
    /// another collection or would not be a valid record, and database
    /// errors.
    pub fn handle_upload(
        &self,
        owner: &str,
        entity_type: EntityType,
        request: UploadRequest,
    ) -> ServerResult<UpsertOutcome> {
        let mut record = request.record;
        validate_snapshot(entity_type, &record)?;
        if !owner.is_empty() {
            record.user_id = Some(owner.to_string());
        }

        let outcome = self.context.repository.upsert(
            owner,
            &record,
            request.base_server_timestamp,
            self.now(),
        )?;
        match &outcome {
            UpsertOutcome::Stored(ack) => tracing::debug!(
                entity = %entity_type,
                client_id = %record.client_id,
                created = ack.created,
                "upload stored"
            ),
            UpsertOutcome::Conflict(_) => tracing::info!(
                entity = %entity_type,
                client_id = %record.client_id,
                base = ?request.base_server_timestamp,
                "upload based on a stale version"
            ),
        }
        Ok(outcome)
    }

    /// Handles a change listing.
    ///
    /// # Errors
    ///
    /// Returns database errors and [`ServerError::CorruptRow`].
    pub fn handle_download(
        &self,
        owner: &str,
        entity_type: EntityType,
        since: Option<Timestamp>,
    ) -> ServerResult<DownloadResponse> {
        let changes = self.context.repository.changed_since(
            owner,
            entity_type,
            since,
            self.context.config.max_download_batch,
            self.now(),
        )?;
        Ok(DownloadResponse {
            records: changes.records,
            server_time: changes.server_time,
        })
    }

    /// Handles a delete.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotFound`] if no row exists.
    pub fn handle_delete(
        &self,
        owner: &str,
        entity_type: EntityType,
        client_id: &ClientId,
    ) -> ServerResult<()> {
        if self
            .context
            .repository
            .tombstone(owner, entity_type, client_id, self.now())?
        {
            Ok(())
        } else {
            Err(ServerError::NotFound(format!("{entity_type} {client_id}")))
        }
    }

    /// Handles a device registration.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidRequest`] for a blank device id.
    pub fn handle_register_device(
        &self,
        owner: &str,
        device: &DeviceRegistration,
    ) -> ServerResult<()> {
        if device.device_id.is_blank() {
            return Err(ServerError::InvalidRequest("device id is blank".into()));
        }
        self.context
            .repository
            .register_device(owner, device, self.now())
    }

    fn now(&self) -> Timestamp {
        self.context.clock.now()
    }
}

/// Checks that `record` belongs to `entity_type` and decodes to a valid
/// record. Tombstones only need the first.
fn validate_snapshot(entity_type: EntityType, record: &RecordSnapshot) -> ServerResult<()> {
    if record.entity_type != entity_type {
        return Err(ServerError::InvalidRequest(format!(
            "{} record sent to {entity_type}",
            record.entity_type
        )));
    }
    if record.deleted {
        return Ok(());
    }
    match entity_type {
        EntityType::Calculation => CalculationRecord::from_snapshot(record)?.validate()?,
        EntityType::ParameterSet => ParameterSet::from_snapshot(record)?.validate()?,
    }
    Ok(())
}
