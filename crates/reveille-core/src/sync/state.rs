//! Persisted sync bookkeeping.
//!
//! Stored as JSON under [`SYNC_STATE_KEY`]:
//! `{"syncStatus": [[id, status]], "multiDeviceState": {"devices": [[id, record]],
//! "conflicts": [...], "lastFullSync": ms|null}}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::{AlarmConflict, AlarmId, AlarmSyncStatus, DeviceId, DeviceRecord};

pub const SYNC_STATE_KEY: &str = "sync_state";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MultiDeviceState {
    pub devices: Vec<(DeviceId, DeviceRecord)>,
    pub conflicts: Vec<AlarmConflict>,
    pub last_full_sync: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedSyncState {
    pub sync_status: Vec<(AlarmId, AlarmSyncStatus)>,
    pub multi_device_state: MultiDeviceState,
}

/// In-memory sync bookkeeping: statuses, peer devices, conflicts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncLedger {
    pub statuses: BTreeMap<AlarmId, AlarmSyncStatus>,
    pub devices: BTreeMap<DeviceId, DeviceRecord>,
    /// Oldest first
    pub conflicts: Vec<AlarmConflict>,
    pub last_full_sync: Option<i64>,
}

impl SyncLedger {
    /// Decode persisted state; anything unreadable yields an empty ledger
    pub fn decode(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return Self::default();
        };
        match serde_json::from_str::<PersistedSyncState>(raw) {
            Ok(state) => Self::from(state),
            Err(error) => {
                warn!(error = %error, "Discarding unreadable sync state");
                Self::default()
            }
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.to_persisted())
    }

    pub fn to_persisted(&self) -> PersistedSyncState {
        PersistedSyncState {
            sync_status: self
                .statuses
                .iter()
                .map(|(id, status)| (id.clone(), status.clone()))
                .collect(),
            multi_device_state: MultiDeviceState {
                devices: self
                    .devices
                    .iter()
                    .map(|(id, record)| (id.clone(), record.clone()))
                    .collect(),
                conflicts: self.conflicts.clone(),
                last_full_sync: self.last_full_sync,
            },
        }
    }

    /// Status for `alarm_id`, created as `pending` on first use
    pub fn status_mut(&mut self, alarm_id: &AlarmId) -> &mut AlarmSyncStatus {
        self.statuses
            .entry(alarm_id.clone())
            .or_insert_with(|| AlarmSyncStatus::new(alarm_id.clone()))
    }

    pub fn unresolved_conflict_mut(&mut self, alarm_id: &AlarmId) -> Option<&mut AlarmConflict> {
        self.conflicts
            .iter_mut()
            .find(|conflict| &conflict.alarm_id == alarm_id && !conflict.is_resolved())
    }

    pub fn unresolved_alarm_ids(&self) -> Vec<AlarmId> {
        self.conflicts
            .iter()
            .filter(|conflict| !conflict.is_resolved())
            .map(|conflict| conflict.alarm_id.clone())
            .collect()
    }

    /// Record a conflict, merging its entries into an unresolved one for the
    /// same alarm if there is one
    pub fn record_conflict(&mut self, conflict: AlarmConflict) {
        if let Some(existing) = self.unresolved_conflict_mut(&conflict.alarm_id) {
            for entry in conflict.entries {
                if !existing.entries.contains(&entry) {
                    existing.entries.push(entry);
                }
            }
            return;
        }
        self.conflicts.push(conflict);
    }

    pub fn touch_device(&mut self, device_id: &DeviceId, online: bool, at: i64) {
        self.devices
            .entry(device_id.clone())
            .and_modify(|record| record.touch(online, at))
            .or_insert_with(|| {
                let mut record = DeviceRecord::new(device_id.clone(), at);
                record.is_online = online;
                record
            });
    }

    pub fn record_device_sync(&mut self, device_id: &DeviceId, online: bool, at: i64) {
        self.devices
            .entry(device_id.clone())
            .or_insert_with(|| DeviceRecord::new(device_id.clone(), at))
            .record_sync(online, at);
    }

    /// Drop the oldest resolved conflicts beyond `limit`. Unresolved ones are kept.
    pub fn prune_conflicts(&mut self, limit: usize) {
        let resolved = self
            .conflicts
            .iter()
            .filter(|conflict| conflict.is_resolved())
            .count();
        let mut excess = resolved.saturating_sub(limit);
        self.conflicts.retain(|conflict| {
            if excess > 0 && conflict.is_resolved() {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }
}

impl From<PersistedSyncState> for SyncLedger {
    fn from(state: PersistedSyncState) -> Self {
        Self {
            statuses: state.sync_status.into_iter().collect(),
            devices: state.multi_device_state.devices.into_iter().collect(),
            conflicts: state.multi_device_state.conflicts,
            last_full_sync: state.multi_device_state.last_full_sync,
        }
    }
}
