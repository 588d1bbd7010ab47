//! Hub wire frames and the typed domain events decoded from them.
//!
//! Every inbound frame is decoded into [`Event`] at the transport boundary;
//! nothing past the router sees raw JSON. Outbound calls are built as
//! [`Invocation`]s and encoded back into frames.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{Alarm, AlarmId, AlarmPatch, DeviceId};

/// Raw hub message: a target name plus its JSON arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubFrame {
    pub target: String,
    #[serde(default)]
    pub arguments: Value,
}

impl HubFrame {
    pub fn new(target: impl Into<String>, arguments: Value) -> Self {
        Self {
            target: target.into(),
            arguments,
        }
    }

    /// Argument payload, unwrapping a single-element argument array
    fn payload(&self) -> Value {
        match &self.arguments {
            Value::Array(items) if items.len() == 1 => items[0].clone(),
            other => other.clone(),
        }
    }
}

/// What happened to an alarm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlarmChange {
    Triggered,
    Dismissed,
    Snoozed { minutes: u32 },
    Enabled,
    Disabled,
    Deleted,
    Updated { patch: AlarmPatch },
    Created { alarm: Alarm },
}

impl AlarmChange {
    /// Whether the change alters alarm state (as opposed to an occurrence)
    pub const fn is_mutation(&self) -> bool {
        !matches!(self, Self::Triggered | Self::Dismissed | Self::Snoozed { .. })
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Triggered => "triggered",
            Self::Dismissed => "dismissed",
            Self::Snoozed { .. } => "snoozed",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Deleted => "deleted",
            Self::Updated { .. } => "updated",
            Self::Created { .. } => "created",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmEvent {
    pub alarm_id: AlarmId,
    pub user_id: String,
    pub device_id: DeviceId,
    /// Unix ms on the sending device
    pub timestamp: i64,
    /// Sender's sync version for the alarm
    #[serde(default)]
    pub version: u64,
    #[serde(flatten)]
    pub change: AlarmChange,
}

/// Scope of a sync request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncType {
    Alarms,
    Settings,
    MlData,
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum SyncKind {
    DeviceOnline,
    DeviceOffline,
    SyncRequested { sync_type: SyncType },
    SyncCompleted { sync_type: SyncType },
    AlarmChanged { event: AlarmEvent },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub user_id: String,
    pub device_id: DeviceId,
    pub timestamp: i64,
    #[serde(flatten)]
    pub kind: SyncKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub priority: NotificationPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alarm_id: Option<AlarmId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Active,
    Idle,
    Away,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEvent {
    pub user_id: String,
    pub device_id: DeviceId,
    pub status: PresenceStatus,
    pub timestamp: i64,
}

/// Payload of `RegisterDevice`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistration {
    pub device_id: DeviceId,
    pub user_id: String,
    pub device_name: String,
    pub platform: String,
}

/// Names the router keys handlers by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    AlarmTriggered,
    AlarmDismissed,
    AlarmSnoozed,
    AlarmUpdated,
    SyncComplete,
    DeviceSync,
    SystemNotification,
    UserPresenceUpdate,
    /// Local event published by the connection manager
    ConnectionStatusChanged,
}

impl EventKind {
    /// Every kind the hub can send
    pub const HUB: [Self; 8] = [
        Self::AlarmTriggered,
        Self::AlarmDismissed,
        Self::AlarmSnoozed,
        Self::AlarmUpdated,
        Self::SyncComplete,
        Self::DeviceSync,
        Self::SystemNotification,
        Self::UserPresenceUpdate,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AlarmTriggered => "AlarmTriggered",
            Self::AlarmDismissed => "AlarmDismissed",
            Self::AlarmSnoozed => "AlarmSnoozed",
            Self::AlarmUpdated => "AlarmUpdated",
            Self::SyncComplete => "SyncComplete",
            Self::DeviceSync => "DeviceSync",
            Self::SystemNotification => "SystemNotification",
            Self::UserPresenceUpdate => "UserPresenceUpdate",
            Self::ConnectionStatusChanged => "ConnectionStatusChanged",
        }
    }

    /// Resolve a hub target name; local-only kinds are never matched
    pub fn from_target(target: &str) -> Option<Self> {
        Self::HUB.into_iter().find(|kind| kind.as_str() == target)
    }
}

/// Typed inbound event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    AlarmTriggered(AlarmEvent),
    AlarmDismissed(AlarmEvent),
    AlarmSnoozed(AlarmEvent),
    AlarmUpdated(AlarmEvent),
    SyncComplete(SyncEvent),
    DeviceSync(SyncEvent),
    SystemNotification(NotificationEvent),
    UserPresenceUpdate(PresenceEvent),
    ConnectionStatusChanged { connected: bool },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown hub target '{0}'")]
    UnknownTarget(String),
    #[error("malformed {target} payload: {source}")]
    Payload {
        target: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl Event {
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::AlarmTriggered(_) => EventKind::AlarmTriggered,
            Self::AlarmDismissed(_) => EventKind::AlarmDismissed,
            Self::AlarmSnoozed(_) => EventKind::AlarmSnoozed,
            Self::AlarmUpdated(_) => EventKind::AlarmUpdated,
            Self::SyncComplete(_) => EventKind::SyncComplete,
            Self::DeviceSync(_) => EventKind::DeviceSync,
            Self::SystemNotification(_) => EventKind::SystemNotification,
            Self::UserPresenceUpdate(_) => EventKind::UserPresenceUpdate,
            Self::ConnectionStatusChanged { .. } => EventKind::ConnectionStatusChanged,
        }
    }

    /// Decode a hub frame into its typed event
    pub fn decode(frame: &HubFrame) -> Result<Self, DecodeError> {
        let kind = EventKind::from_target(&frame.target)
            .ok_or_else(|| DecodeError::UnknownTarget(frame.target.clone()))?;
        let payload = frame.payload();
        let target = kind.as_str();

        let event = match kind {
            EventKind::AlarmTriggered => Self::AlarmTriggered(parse(target, payload)?),
            EventKind::AlarmDismissed => Self::AlarmDismissed(parse(target, payload)?),
            EventKind::AlarmSnoozed => Self::AlarmSnoozed(parse(target, payload)?),
            EventKind::AlarmUpdated => Self::AlarmUpdated(parse(target, payload)?),
            EventKind::SyncComplete => Self::SyncComplete(parse(target, payload)?),
            EventKind::DeviceSync => Self::DeviceSync(parse(target, payload)?),
            EventKind::SystemNotification => Self::SystemNotification(parse(target, payload)?),
            EventKind::UserPresenceUpdate => Self::UserPresenceUpdate(parse(target, payload)?),
            EventKind::ConnectionStatusChanged => {
                return Err(DecodeError::UnknownTarget(frame.target.clone()))
            }
        };
        Ok(event)
    }
}

fn parse<T: DeserializeOwned>(target: &'static str, payload: Value) -> Result<T, DecodeError> {
    serde_json::from_value(payload).map_err(|source| DecodeError::Payload { target, source })
}

/// Outbound hub call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    RegisterDevice(DeviceRegistration),
    SendAlarmEvent(AlarmEvent),
    SendSyncEvent(SyncEvent),
    RequestSync(SyncType),
    UpdatePresence(PresenceEvent),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestSyncArguments {
    sync_type: SyncType,
}

impl Invocation {
    pub const fn target(&self) -> &'static str {
        match self {
            Self::RegisterDevice(_) => "RegisterDevice",
            Self::SendAlarmEvent(_) => "SendAlarmEvent",
            Self::SendSyncEvent(_) => "SendSyncEvent",
            Self::RequestSync(_) => "RequestSync",
            Self::UpdatePresence(_) => "UpdatePresence",
        }
    }

    pub fn into_frame(self) -> serde_json::Result<HubFrame> {
        let target = self.target();
        let arguments = match self {
            Self::RegisterDevice(registration) => serde_json::to_value(registration)?,
            Self::SendAlarmEvent(event) => serde_json::to_value(event)?,
            Self::SendSyncEvent(event) => serde_json::to_value(event)?,
            Self::RequestSync(sync_type) => {
                serde_json::to_value(RequestSyncArguments { sync_type })?
            }
            Self::UpdatePresence(presence) => serde_json::to_value(presence)?,
        };
        Ok(HubFrame::new(target, arguments))
    }
}
