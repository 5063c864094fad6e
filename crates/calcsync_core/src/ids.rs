//! Client and device identifiers.

use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Client-generated identity of a logical record.
///
/// Client IDs are UUIDs that are:
/// - Generated on the device that creates the record
/// - Immutable once assigned
/// - The key the remote side upserts on
///
/// Two rows with the same client ID on different devices are the same
/// logical record.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Creates a new random client ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a client ID from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.0)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ClientId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ModelError::InvalidId(s.to_string()))
    }
}

/// Identifier of the device that owns a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a device ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a random device ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the ID is empty or whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_unique() {
        let a = ClientId::new();
        let b = ClientId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn client_id_text_roundtrip() {
        let id = ClientId::new();
        let parsed: ClientId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn client_id_rejects_garbage() {
        assert!(matches!(
            "not-a-uuid".parse::<ClientId>(),
            Err(ModelError::InvalidId(_))
        ));
    }

    #[test]
    fn client_id_serializes_as_string() {
        let id = ClientId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }

    #[test]
    fn device_id_blank() {
        assert!(DeviceId::new("  ").is_blank());
        assert!(!DeviceId::new("tablet-7").is_blank());
    }
}
