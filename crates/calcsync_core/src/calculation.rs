//! Calculation records.

use crate::error::{ModelError, ModelResult};
use crate::ids::{ClientId, DeviceId};
use crate::status::SyncStatus;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

text_enum! {
    /// Engineering calculation that produced a record.
    pub enum CalculationType {
        /// Conductor voltage drop.
        VoltageDrop => "voltage_drop",
        /// Conductor sizing by ampacity.
        CableSizing => "cable_sizing",
        /// Raceway fill percentage.
        ConduitFill => "conduit_fill",
        /// Available fault current.
        ShortCircuit => "short_circuit",
        /// Service and feeder load.
        LoadCalculation => "load_calculation",
        /// Power factor correction.
        PowerFactor => "power_factor",
        /// Grounding electrode conductor.
        Grounding => "grounding",
        /// Motor branch circuit.
        MotorCircuit => "motor_circuit",
    }
}

/// An immutable result produced by the calculation engine, plus its sync
/// bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationRecord {
    /// Local row id; `None` until saved.
    pub id: Option<i64>,
    /// Identifier assigned by the remote side.
    pub server_id: Option<String>,
    /// Client-generated identity.
    pub client_id: ClientId,
    /// Calculation that produced the record.
    pub calculation_type: CalculationType,
    /// Input parameters (opaque JSON object).
    pub parameters: Value,
    /// Result payload (opaque JSON).
    pub result: Value,
    /// Optional project label.
    pub project_name: Option<String>,
    /// Free-form notes.
    pub notes: Option<String>,
    /// Creation time on the owning device.
    pub created_at: Timestamp,
    /// Last local modification.
    pub updated_at: Option<Timestamp>,
    /// Device that owns the record.
    pub device_id: DeviceId,
    /// Owning user, once known.
    pub user_id: Option<String>,
    /// Synchronization state.
    pub sync_status: SyncStatus,
    /// Last server version this device has seen.
    pub server_timestamp: Option<Timestamp>,
}

impl CalculationRecord {
    /// Creates a pending record with a fresh client ID.
    pub fn new(
        calculation_type: CalculationType,
        parameters: Value,
        result: Value,
        device_id: DeviceId,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: None,
            server_id: None,
            client_id: ClientId::new(),
            calculation_type,
            parameters,
            result,
            project_name: None,
            notes: None,
            created_at,
            updated_at: None,
            device_id,
            user_id: None,
            sync_status: SyncStatus::Pending,
            server_timestamp: None,
        }
    }

    /// Sets the client ID.
    #[must_use]
    pub fn with_client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = client_id;
        self
    }

    /// Sets the project name.
    #[must_use]
    pub fn with_project_name(mut self, name: impl Into<String>) -> Self {
        self.project_name = Some(name.into());
        self
    }

    /// Sets the notes.
    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Sets the owning user.
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Sets the last-modified time.
    #[must_use]
    pub fn with_updated_at(mut self, updated_at: Timestamp) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    /// The timestamp used to order versions: `updated_at`, else `created_at`.
    #[must_use]
    pub fn effective_timestamp(&self) -> Timestamp {
        self.updated_at.unwrap_or(self.created_at)
    }

    /// Records a local modification.
    pub fn touch(&mut self, now: Timestamp) {
        self.updated_at = Some(now);
        if self.sync_status == SyncStatus::Synced {
            self.sync_status = SyncStatus::Pending;
        }
    }

    /// Checks the record before it is persisted or queued.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Validation`] for a blank device ID, a
    /// non-object parameter payload or a null result.
    pub fn validate(&self) -> ModelResult<()> {
        if self.device_id.is_blank() {
            return Err(ModelError::validation("device id is empty"));
        }
        if !self.parameters.is_object() {
            return Err(ModelError::validation(
                "calculation parameters must be a JSON object",
            ));
        }
        if self.result.is_null() {
            return Err(ModelError::validation("calculation result is missing"));
        }
        if let Some(updated) = self.updated_at {
            if updated < self.created_at {
                return Err(ModelError::validation("updated_at precedes created_at"));
            }
        }
        Ok(())
    }
}

/// A partial update to a calculation record.
///
/// Only fields that are `Some` are written. For nullable columns the inner
/// option distinguishes "set to this value" from "clear": `Some(None)`
/// clears, `None` leaves the stored value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalculationPatch {
    /// New parameters.
    pub parameters: Option<Value>,
    /// New result.
    pub result: Option<Value>,
    /// New project name.
    pub project_name: Option<Option<String>>,
    /// New notes.
    pub notes: Option<Option<String>>,
    /// New owning user.
    pub user_id: Option<Option<String>>,
    /// New modification time.
    pub updated_at: Option<Timestamp>,
    /// New sync status.
    pub sync_status: Option<SyncStatus>,
}

impl CalculationPatch {
    /// Creates an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Sets the result.
    #[must_use]
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    /// Sets or clears the project name.
    #[must_use]
    pub fn with_project_name(mut self, name: Option<String>) -> Self {
        self.project_name = Some(name);
        self
    }

    /// Sets or clears the notes.
    #[must_use]
    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = Some(notes);
        self
    }

    /// Sets or clears the owning user.
    #[must_use]
    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Sets the modification time.
    #[must_use]
    pub fn with_updated_at(mut self, at: Timestamp) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// Sets the sync status.
    #[must_use]
    pub fn with_sync_status(mut self, status: SyncStatus) -> Self {
        self.sync_status = Some(status);
        self
    }

    /// Returns true if the patch writes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the present fields to a record in memory.
    pub fn apply_to(&self, record: &mut CalculationRecord) {
        if let Some(parameters) = &self.parameters {
            record.parameters = parameters.clone();
        }
        if let Some(result) = &self.result {
            record.result = result.clone();
        }
        if let Some(name) = &self.project_name {
            record.project_name = name.clone();
        }
        if let Some(notes) = &self.notes {
            record.notes = notes.clone();
        }
        if let Some(user) = &self.user_id {
            record.user_id = user.clone();
        }
        if let Some(at) = self.updated_at {
            record.updated_at = Some(at);
        }
        if let Some(status) = self.sync_status {
            record.sync_status = status;
        }
    }
}
