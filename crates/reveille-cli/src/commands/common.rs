use chrono::{DateTime, Utc};
use reveille_core::models::{AlarmConflict, SyncState};
use reveille_core::queue::{QueuedOperation, QUEUE_STATE_KEY};
use reveille_core::services::StateStore;
use reveille_core::sync::{SyncLedger, SYNC_STATE_KEY};
use serde::Serialize;

use crate::config::CliConfig;
use crate::error::CliError;
use crate::runtime::open_state;

#[derive(Debug, Serialize)]
pub struct StatusItem {
    pub alarm_id: String,
    pub state: SyncState,
    pub version: u64,
    pub last_sync_time: i64,
    pub last_modified_by: Option<String>,
}

/// Read persisted sync state and the offline queue without connecting
pub async fn load_local_state(
    config: &CliConfig,
) -> Result<(SyncLedger, Vec<QueuedOperation>), CliError> {
    let (_db, state) = open_state(&config.resolve_db_path()?)?;
    let ledger = SyncLedger::decode(state.load(SYNC_STATE_KEY).await?.as_deref());
    let queue = match state.load(QUEUE_STATE_KEY).await? {
        Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|error| {
            tracing::warn!(%error, "Offline queue state is unreadable");
            Vec::new()
        }),
        None => Vec::new(),
    };
    Ok((ledger, queue))
}

pub fn status_items(ledger: &SyncLedger) -> Vec<StatusItem> {
    ledger
        .statuses
        .values()
        .map(|status| StatusItem {
            alarm_id: status.alarm_id.to_string(),
            state: status.state,
            version: status.version,
            last_sync_time: status.last_sync_time,
            last_modified_by: status.last_modified_by.as_ref().map(ToString::to_string),
        })
        .collect()
}

pub fn format_timestamp(millis: i64) -> String {
    if millis <= 0 {
        return "never".to_string();
    }
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map_or_else(|| millis.to_string(), |time| time.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

pub const fn state_label(state: SyncState) -> &'static str {
    match state {
        SyncState::Synced => "synced",
        SyncState::Pending => "pending",
        SyncState::Conflict => "conflict",
        SyncState::Error => "error",
    }
}

pub fn format_status_lines(ledger: &SyncLedger) -> Vec<String> {
    let mut lines = vec![format!(
        "Last full sync: {}",
        ledger
            .last_full_sync
            .map_or_else(|| "never".to_string(), format_timestamp)
    )];

    if ledger.statuses.is_empty() {
        lines.push("No alarms tracked yet.".to_string());
    }
    for status in ledger.statuses.values() {
        lines.push(format!(
            "{:<24} {:<8} v{:<4} {} by {}",
            status.alarm_id.as_str(),
            state_label(status.state),
            status.version,
            format_timestamp(status.last_sync_time),
            status
                .last_modified_by
                .as_ref()
                .map_or("-", |device| device.as_str())
        ));
    }

    if !ledger.devices.is_empty() {
        lines.push(String::new());
        lines.push("Devices:".to_string());
        for device in ledger.devices.values() {
            lines.push(format!(
                "  {} {} last seen {} ({} sync events)",
                device.device_id,
                if device.is_online { "online " } else { "offline" },
                format_timestamp(device.last_seen),
                device.sync_version
            ));
        }
    }

    if !ledger.conflicts.is_empty() {
        lines.push(String::new());
        lines.push("Conflicts:".to_string());
        lines.extend(ledger.conflicts.iter().map(format_conflict_line));
    }
    lines
}

fn format_conflict_line(conflict: &AlarmConflict) -> String {
    let resolution = match (&conflict.resolved_by, conflict.resolved_at) {
        (Some(winner), Some(at)) => format!("won by {winner} at {}", format_timestamp(at)),
        _ => "unresolved".to_string(),
    };
    format!(
        "  {} {:?} ({} entries) {}",
        conflict.alarm_id,
        conflict.conflict_type,
        conflict.entries.len(),
        resolution
    )
}

pub fn format_queue_lines(operations: &[QueuedOperation]) -> Vec<String> {
    operations
        .iter()
        .map(|operation| {
            format!(
                "{} {:<6} {:<12} queued {}",
                operation.id,
                operation.action,
                operation.entity_kind,
                format_timestamp(operation.enqueued_at)
            )
        })
        .collect()
}
