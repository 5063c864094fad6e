//! Request and response bodies.

use crate::snapshot::RecordSnapshot;
use calcsync_core::{DeviceId, DeviceInfo, Timestamp};
use serde::{Deserialize, Serialize};

/// Body of `POST /api/sync/{entityType}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Record to store.
    pub record: RecordSnapshot,
    /// Server version the client last saw; `None` for a first upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_server_timestamp: Option<Timestamp>,
}

impl UploadRequest {
    /// Creates an upload based on the record's own server timestamp.
    #[must_use]
    pub fn new(record: RecordSnapshot) -> Self {
        let base_server_timestamp = record.server_timestamp;
        Self {
            record,
            base_server_timestamp,
        }
    }
}

/// Successful upload acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Server-assigned id.
    pub server_id: String,
    /// New server version.
    pub server_timestamp: Timestamp,
    /// True when the upload created the remote row.
    #[serde(default)]
    pub created: bool,
}

/// Body of a `409 Conflict` answer to an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResponse {
    /// The server's current version.
    pub current: RecordSnapshot,
}

/// Body of `GET /api/sync/{entityType}?since=`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadResponse {
    /// Records changed strictly after `since`, tombstones included.
    pub records: Vec<RecordSnapshot>,
    /// Server time at which the listing was taken; the next checkpoint.
    pub server_time: Timestamp,
}

/// Body of `POST /api/devices`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRegistration {
    /// Device id.
    pub device_id: DeviceId,
    /// Human-readable name.
    pub display_name: String,
    /// Platform label.
    pub platform: String,
    /// Application version.
    pub app_version: String,
}

impl From<&DeviceInfo> for DeviceRegistration {
    fn from(info: &DeviceInfo) -> Self {
        Self {
            device_id: info.device_id.clone(),
            display_name: info.display_name.clone(),
            platform: info.platform.clone(),
            app_version: info.app_version.clone(),
        }
    }
}

/// Error body returned with every non-2xx status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code, e.g. `unauthorized`.
    pub error: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorBody {
    /// Creates an error body.
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

/// Bearer credentials presented with every request.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    token: Option<String>,
}

impl Credentials {
    /// Credentials carrying a bearer token.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    /// No credentials, for servers running without auth.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// The token, if any.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Value of the `Authorization` header, if any.
    #[must_use]
    pub fn authorization(&self) -> Option<String> {
        self.token.as_ref().map(|t| format!("Bearer {t}"))
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
