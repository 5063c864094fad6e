//! Entity-neutral record snapshots.
//!
//! Records cross the wire, and are compared by the conflict resolver, as a
//! [`RecordSnapshot`]: sync metadata in typed fields plus the entity's own
//! content in a JSON map. The resolver works on snapshots only, so it never
//! needs to know which entity it is merging.

use crate::error::{ProtocolError, ProtocolResult};
use calcsync_core::{
    CalculationRecord, ClientId, DeviceId, EntityType, ParameterSet, SyncStatus, Timestamp,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A record as it travels between device and server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    /// Entity kind.
    pub entity_type: EntityType,
    /// Client-generated identity.
    pub client_id: ClientId,
    /// Server-assigned id, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    /// Device that wrote this version.
    pub device_id: DeviceId,
    /// Owning user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last modification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Timestamp>,
    /// Server version this snapshot is, or is based on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_timestamp: Option<Timestamp>,
    /// Tombstone flag.
    #[serde(default)]
    pub deleted: bool,
    /// Entity content.
    pub data: Map<String, Value>,
}

impl RecordSnapshot {
    /// `updated_at`, else `created_at`.
    #[must_use]
    pub fn effective_timestamp(&self) -> Timestamp {
        self.updated_at.unwrap_or(self.created_at)
    }

    /// Returns true if both snapshots carry the same content.
    ///
    /// Only the entity content and the tombstone flag count; sync metadata
    /// such as timestamps and server ids does not.
    #[must_use]
    pub fn same_content(&self, other: &RecordSnapshot) -> bool {
        self.deleted == other.deleted && self.data == other.data
    }

    /// Snapshot as a JSON value, for conflict history.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Reads a required field.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidSnapshot`] if it is absent.
    pub fn field(&self, name: &'static str) -> ProtocolResult<&Value> {
        self.data
            .get(name)
            .ok_or_else(|| ProtocolError::invalid_snapshot(name, "missing"))
    }

    fn text(&self, name: &'static str) -> ProtocolResult<String> {
        self.field(name)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProtocolError::invalid_snapshot(name, "expected a string"))
    }

    fn optional_text(&self, name: &'static str) -> ProtocolResult<Option<String>> {
        match self.data.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(ProtocolError::invalid_snapshot(name, "expected a string")),
        }
    }

    fn expect_entity(&self, expected: EntityType) -> ProtocolResult<()> {
        if self.entity_type == expected {
            Ok(())
        } else {
            Err(ProtocolError::EntityMismatch {
                expected: expected.as_str(),
                found: self.entity_type.as_str(),
            })
        }
    }
}

/// A record type that can be synchronized.
pub trait Syncable: Sized {
    /// Entity kind of this type.
    const ENTITY: EntityType;

    /// Converts the record to its wire form.
    fn to_snapshot(&self) -> RecordSnapshot;

    /// Builds a record from a snapshot. The result has no local id and is
    /// marked `synced`.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot is for another entity or a field is
    /// missing or malformed.
    fn from_snapshot(snapshot: &RecordSnapshot) -> ProtocolResult<Self>;
}

impl Syncable for CalculationRecord {
    const ENTITY: EntityType = EntityType::Calculation;

    fn to_snapshot(&self) -> RecordSnapshot {
        let mut data = Map::new();
        data.insert(
            "calculation_type".into(),
            Value::String(self.calculation_type.as_str().into()),
        );
        data.insert("parameters".into(), self.parameters.clone());
        data.insert("result".into(), self.result.clone());
        data.insert(
            "project_name".into(),
            self.project_name.clone().map_or(Value::Null, Value::String),
        );
        data.insert(
            "notes".into(),
            self.notes.clone().map_or(Value::Null, Value::String),
        );
        RecordSnapshot {
            entity_type: Self::ENTITY,
            client_id: self.client_id,
            server_id: self.server_id.clone(),
            device_id: self.device_id.clone(),
            user_id: self.user_id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            server_timestamp: self.server_timestamp,
            deleted: false,
            data,
        }
    }

    fn from_snapshot(snapshot: &RecordSnapshot) -> ProtocolResult<Self> {
        snapshot.expect_entity(Self::ENTITY)?;
        Ok(CalculationRecord {
            id: None,
            server_id: snapshot.server_id.clone(),
            client_id: snapshot.client_id,
            calculation_type: snapshot.text("calculation_type")?.parse()?,
            parameters: snapshot.field("parameters")?.clone(),
            result: snapshot.field("result")?.clone(),
            project_name: snapshot.optional_text("project_name")?,
            notes: snapshot.optional_text("notes")?,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            device_id: snapshot.device_id.clone(),
            user_id: snapshot.user_id.clone(),
            sync_status: SyncStatus::Synced,
            server_timestamp: snapshot.server_timestamp,
        })
    }
}

impl Syncable for ParameterSet {
    const ENTITY: EntityType = EntityType::ParameterSet;

    fn to_snapshot(&self) -> RecordSnapshot {
        let mut data = Map::new();
        data.insert("name".into(), Value::String(self.name.clone()));
        data.insert(
            "calculation_type".into(),
            Value::String(self.calculation_type.as_str().into()),
        );
        data.insert("parameters".into(), self.parameters.clone());
        data.insert("is_preset".into(), Value::Bool(self.is_preset));
        data.insert(
            "tags".into(),
            Value::Array(self.tags.iter().cloned().map(Value::String).collect()),
        );
        RecordSnapshot {
            entity_type: Self::ENTITY,
            client_id: self.client_id,
            server_id: self.server_id.clone(),
            device_id: self.device_id.clone(),
            user_id: None,
            created_at: self.created_at,
            updated_at: self.updated_at,
            server_timestamp: self.server_timestamp,
            deleted: false,
            data,
        }
    }

    fn from_snapshot(snapshot: &RecordSnapshot) -> ProtocolResult<Self> {
        snapshot.expect_entity(Self::ENTITY)?;
        let tags = match snapshot.data.get("tags") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|t| {
                    t.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| ProtocolError::invalid_snapshot("tags", "expected strings"))
                })
                .collect::<ProtocolResult<Vec<_>>>()?,
            Some(_) => return Err(ProtocolError::invalid_snapshot("tags", "expected an array")),
        };
        Ok(ParameterSet {
            id: None,
            server_id: snapshot.server_id.clone(),
            client_id: snapshot.client_id,
            name: snapshot.text("name")?,
            calculation_type: snapshot.text("calculation_type")?.parse()?,
            parameters: snapshot.field("parameters")?.clone(),
            is_preset: snapshot
                .data
                .get("is_preset")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            tags,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            device_id: snapshot.device_id.clone(),
            sync_status: SyncStatus::Synced,
            server_timestamp: snapshot.server_timestamp,
        })
    }
}
