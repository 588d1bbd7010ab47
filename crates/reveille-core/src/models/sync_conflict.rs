//! Sync conflict model

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::{Alarm, AlarmId, DeviceId};
use crate::events::AlarmChange;

/// What the competing updates disagree about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    TimeChange,
    EnableDisable,
    Delete,
    Create,
}

impl ConflictType {
    /// Classify a conflict by the incoming change
    pub fn from_change(change: &AlarmChange) -> Self {
        match change {
            AlarmChange::Enabled | AlarmChange::Disabled => Self::EnableDisable,
            AlarmChange::Deleted => Self::Delete,
            AlarmChange::Created { .. } => Self::Create,
            AlarmChange::Updated { patch } if patch.enabled.is_some() && !patch.changes_schedule() => {
                Self::EnableDisable
            }
            _ => Self::TimeChange,
        }
    }
}

/// State a competing device put forward
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EntryPayload {
    /// The local alarm as it stood when the conflict was detected
    Snapshot(Option<Alarm>),
    /// A remote change that has not been applied locally
    Change(AlarmChange),
}

/// One side of a conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictEntry {
    pub device_id: DeviceId,
    pub version: u64,
    pub timestamp: i64,
    pub payload: EntryPayload,
}

/// Divergent alarm states reported by two or more devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmConflict {
    pub alarm_id: AlarmId,
    pub conflict_type: ConflictType,
    pub entries: Vec<ConflictEntry>,
    /// Unix ms
    pub detected_at: i64,
    #[serde(default)]
    pub resolved_by: Option<DeviceId>,
    #[serde(default)]
    pub resolved_at: Option<i64>,
}

impl AlarmConflict {
    pub const fn is_resolved(&self) -> bool {
        self.resolved_by.is_some()
    }

    /// Last-writer-wins pick: latest timestamp, then lexically greatest device id.
    pub fn winner(&self) -> Option<&ConflictEntry> {
        self.entries.iter().max_by(|left, right| compare_entries(left, right))
    }

    pub fn max_version(&self) -> u64 {
        self.entries
            .iter()
            .map(|entry| entry.version)
            .max()
            .unwrap_or(0)
    }

    pub fn mark_resolved(&mut self, by: DeviceId, at: i64) {
        self.resolved_by = Some(by);
        self.resolved_at = Some(at);
    }
}

fn compare_entries(left: &ConflictEntry, right: &ConflictEntry) -> Ordering {
    left.timestamp
        .cmp(&right.timestamp)
        .then_with(|| left.device_id.cmp(&right.device_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlarmPatch;

    fn entry(device: &str, version: u64, timestamp: i64) -> ConflictEntry {
        ConflictEntry {
            device_id: DeviceId::new(device),
            version,
            timestamp,
            payload: EntryPayload::Change(AlarmChange::Enabled),
        }
    }

    fn conflict(entries: Vec<ConflictEntry>) -> AlarmConflict {
        AlarmConflict {
            alarm_id: AlarmId::new("x"),
            conflict_type: ConflictType::EnableDisable,
            entries,
            detected_at: 0,
            resolved_by: None,
            resolved_at: None,
        }
    }

    #[test]
    fn winner_is_latest_timestamp_regardless_of_order() {
        let forward = conflict(vec![entry("a", 9, 100), entry("b", 2, 105)]);
        let backward = conflict(vec![entry("b", 2, 105), entry("a", 9, 100)]);
        assert_eq!(forward.winner().unwrap().device_id, DeviceId::new("b"));
        assert_eq!(backward.winner().unwrap().device_id, DeviceId::new("b"));
        assert_eq!(forward.max_version(), 9);
    }

    #[test]
    fn equal_timestamps_break_ties_by_device_id() {
        let forward = conflict(vec![entry("alpha", 1, 100), entry("zulu", 1, 100)]);
        let backward = conflict(vec![entry("zulu", 1, 100), entry("alpha", 1, 100)]);
        assert_eq!(forward.winner().unwrap().device_id, DeviceId::new("zulu"));
        assert_eq!(backward.winner().unwrap().device_id, DeviceId::new("zulu"));
    }

    #[test]
    fn conflict_type_follows_change() {
        assert_eq!(
            ConflictType::from_change(&AlarmChange::Disabled),
            ConflictType::EnableDisable
        );
        assert_eq!(
            ConflictType::from_change(&AlarmChange::Deleted),
            ConflictType::Delete
        );
        assert_eq!(
            ConflictType::from_change(&AlarmChange::Updated {
                patch: AlarmPatch::time("08:00")
            }),
            ConflictType::TimeChange
        );
        assert_eq!(
            ConflictType::from_change(&AlarmChange::Updated {
                patch: AlarmPatch::enabled(true)
            }),
            ConflictType::EnableDisable
        );
    }

    #[test]
    fn mark_resolved_stamps_both_fields() {
        let mut conflict = conflict(vec![entry("a", 1, 1)]);
        assert!(!conflict.is_resolved());
        conflict.mark_resolved(DeviceId::new("a"), 77);
        assert!(conflict.is_resolved());
        assert_eq!(conflict.resolved_at, Some(77));
    }
}
