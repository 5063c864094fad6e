//! Device identity and user settings.

use crate::ids::DeviceId;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity this device presents to the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Device id.
    pub device_id: DeviceId,
    /// Human-readable name.
    pub display_name: String,
    /// Operating system or platform label.
    pub platform: String,
    /// Application version.
    pub app_version: String,
}

impl DeviceInfo {
    /// Creates device info.
    pub fn new(device_id: DeviceId, display_name: impl Into<String>) -> Self {
        Self {
            device_id,
            display_name: display_name.into(),
            platform: std::env::consts::OS.to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Sets the platform label.
    #[must_use]
    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }
}

/// A local key/value preference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSetting {
    /// Setting key.
    pub key: String,
    /// JSON value.
    pub value: Value,
    /// Last write.
    pub updated_at: Timestamp,
}
