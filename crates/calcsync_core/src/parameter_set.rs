//! Named parameter sets.

use crate::calculation::CalculationType;
use crate::error::{ModelError, ModelResult};
use crate::ids::{ClientId, DeviceId};
use crate::status::SyncStatus;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A reusable, named set of calculation inputs.
///
/// Presets ship with the application; they are immutable and cannot be
/// deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    /// Local row id; `None` until saved.
    pub id: Option<i64>,
    /// Identifier assigned by the remote side.
    pub server_id: Option<String>,
    /// Client-generated identity.
    pub client_id: ClientId,
    /// Display name.
    pub name: String,
    /// Calculation these parameters feed.
    pub calculation_type: CalculationType,
    /// Parameter values (JSON object).
    pub parameters: Value,
    /// Built-in preset flag.
    pub is_preset: bool,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last local modification.
    pub updated_at: Option<Timestamp>,
    /// Device that owns the set.
    pub device_id: DeviceId,
    /// Synchronization state.
    pub sync_status: SyncStatus,
    /// Last server version this device has seen.
    pub server_timestamp: Option<Timestamp>,
}

impl ParameterSet {
    /// Creates a pending, non-preset parameter set.
    pub fn new(
        name: impl Into<String>,
        calculation_type: CalculationType,
        parameters: Value,
        device_id: DeviceId,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: None,
            server_id: None,
            client_id: ClientId::new(),
            name: name.into(),
            calculation_type,
            parameters,
            is_preset: false,
            tags: Vec::new(),
            created_at,
            updated_at: None,
            device_id,
            sync_status: SyncStatus::Pending,
            server_timestamp: None,
        }
    }

    /// Marks the set as a built-in preset.
    #[must_use]
    pub fn as_preset(mut self) -> Self {
        self.is_preset = true;
        self
    }

    /// Sets the tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// The timestamp used to order versions.
    #[must_use]
    pub fn effective_timestamp(&self) -> Timestamp {
        self.updated_at.unwrap_or(self.created_at)
    }

    /// Checks the set before it is persisted or queued.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Validation`] for a blank name or device ID or a
    /// non-object parameter payload.
    pub fn validate(&self) -> ModelResult<()> {
        if self.name.trim().is_empty() {
            return Err(ModelError::validation("parameter set name is empty"));
        }
        if self.device_id.is_blank() {
            return Err(ModelError::validation("device id is empty"));
        }
        if !self.parameters.is_object() {
            return Err(ModelError::validation(
                "parameter set values must be a JSON object",
            ));
        }
        Ok(())
    }
}

/// A partial update to a parameter set. Only `Some` fields are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSetPatch {
    /// New display name.
    pub name: Option<String>,
    /// New parameter values.
    pub parameters: Option<Value>,
    /// New tags.
    pub tags: Option<Vec<String>>,
    /// New modification time.
    pub updated_at: Option<Timestamp>,
    /// New sync status.
    pub sync_status: Option<SyncStatus>,
}

impl ParameterSetPatch {
    /// Creates an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Sets the tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Sets the modification time.
    #[must_use]
    pub fn with_updated_at(mut self, at: Timestamp) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// Returns true if the patch writes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the present fields to a set in memory.
    pub fn apply_to(&self, set: &mut ParameterSet) {
        if let Some(name) = &self.name {
            set.name = name.clone();
        }
        if let Some(parameters) = &self.parameters {
            set.parameters = parameters.clone();
        }
        if let Some(tags) = &self.tags {
            set.tags = tags.clone();
        }
        if let Some(at) = self.updated_at {
            set.updated_at = Some(at);
        }
        if let Some(status) = self.sync_status {
            set.sync_status = status;
        }
    }
}
