//! Per-alarm sync status

use serde::{Deserialize, Serialize};

use super::{AlarmId, DeviceId};

/// Where an alarm stands relative to the other devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Synced,
    /// Local change not yet delivered
    #[default]
    Pending,
    /// Competing updates detected, resolution in progress
    Conflict,
    /// Last apply or resolution failed; retried by the sweep
    Error,
}

/// Sync bookkeeping for one alarm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmSyncStatus {
    pub alarm_id: AlarmId,
    /// Unix ms of the last local sync; 0 until the first one
    pub last_sync_time: i64,
    pub state: SyncState,
    /// Monotonic per-alarm version
    pub version: u64,
    #[serde(default)]
    pub last_modified_by: Option<DeviceId>,
}

impl AlarmSyncStatus {
    pub const fn new(alarm_id: AlarmId) -> Self {
        Self {
            alarm_id,
            last_sync_time: 0,
            state: SyncState::Pending,
            version: 0,
            last_modified_by: None,
        }
    }

    pub const fn has_synced(&self) -> bool {
        self.last_sync_time > 0
    }

    /// Raise the version to at least `version`; never lowers it
    pub fn raise_version(&mut self, version: u64) {
        self.version = self.version.max(version);
    }

    /// Increment the version by one and return the new value
    pub fn bump_version(&mut self) -> u64 {
        self.version = self.version.saturating_add(1);
        self.version
    }

    /// Mark synced at `at` with `by` as the last writer
    pub fn mark_synced(&mut self, by: DeviceId, at: i64) {
        self.state = SyncState::Synced;
        self.last_modified_by = Some(by);
        self.last_sync_time = self.last_sync_time.max(at);
    }
}
