//! Device identity and registry records

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One logical client installation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh device id (UUID v7, time-sortable)
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("device-{}", Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
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

/// Last known state of a peer device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub device_id: DeviceId,
    pub is_online: bool,
    /// Unix ms of the latest event seen from the device
    pub last_seen: i64,
    /// Count of sync events observed from the device
    pub sync_version: u64,
}

impl DeviceRecord {
    pub const fn new(device_id: DeviceId, seen_at: i64) -> Self {
        Self {
            device_id,
            is_online: true,
            last_seen: seen_at,
            sync_version: 0,
        }
    }

    /// Refresh liveness; `last_seen` never moves backwards
    pub fn touch(&mut self, online: bool, at: i64) {
        self.is_online = online;
        self.last_seen = self.last_seen.max(at);
    }

    /// Refresh liveness and count one more sync event
    pub fn record_sync(&mut self, online: bool, at: i64) {
        self.touch(online, at);
        self.sync_version = self.sync_version.saturating_add(1);
    }
}
