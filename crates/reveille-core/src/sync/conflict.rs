//! Conflict detection and last-writer-wins entry construction.

use crate::events::AlarmEvent;
use crate::models::{
    Alarm, AlarmConflict, AlarmSyncStatus, ConflictEntry, ConflictType, DeviceId, EntryPayload,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictResolver {
    window_ms: i64,
}

impl ConflictResolver {
    pub const fn new(window_ms: i64) -> Self {
        Self { window_ms }
    }

    /// Whether `event` competes with the local state described by `status`.
    ///
    /// An alarm that has never synced locally has nothing to compete with.
    pub const fn is_conflict(&self, status: &AlarmSyncStatus, event: &AlarmEvent) -> bool {
        status.has_synced() && (event.timestamp - status.last_sync_time).abs() < self.window_ms
    }

    /// Build the two-sided conflict for an incoming `event`
    pub fn build(
        &self,
        local_device: &DeviceId,
        status: &AlarmSyncStatus,
        local_alarm: Option<Alarm>,
        event: &AlarmEvent,
        detected_at: i64,
    ) -> AlarmConflict {
        AlarmConflict {
            alarm_id: event.alarm_id.clone(),
            conflict_type: ConflictType::from_change(&event.change),
            entries: vec![
                ConflictEntry {
                    device_id: local_device.clone(),
                    version: status.version,
                    timestamp: status.last_sync_time,
                    payload: EntryPayload::Snapshot(local_alarm),
                },
                ConflictEntry {
                    device_id: event.device_id.clone(),
                    version: event.version,
                    timestamp: event.timestamp,
                    payload: EntryPayload::Change(event.change.clone()),
                },
            ],
            detected_at,
            resolved_by: None,
            resolved_at: None,
        }
    }
}
