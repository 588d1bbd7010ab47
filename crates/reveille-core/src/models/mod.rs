//! Data models for Reveille sync

mod alarm;
mod device;
mod sync_conflict;
mod sync_status;

pub use alarm::{Alarm, AlarmId, AlarmPatch};
pub use device::{DeviceId, DeviceRecord};
pub use sync_conflict::{AlarmConflict, ConflictEntry, ConflictType, EntryPayload};
pub use sync_status::{AlarmSyncStatus, SyncState};
