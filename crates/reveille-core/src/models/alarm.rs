//! Alarm model

use std::fmt;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Server-assigned alarm identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlarmId(String);

impl AlarmId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AlarmId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A scheduled wake event owned by a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alarm {
    /// Unique identifier
    pub id: AlarmId,
    /// User-facing label
    pub label: String,
    /// Local wall-clock time, `HH:MM`
    pub time: String,
    /// Weekdays the alarm repeats on (0 = Sunday); empty means one-shot
    #[serde(default)]
    pub days: Vec<u8>,
    pub enabled: bool,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

impl Alarm {
    /// Create an enabled one-shot alarm
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>, time: impl Into<String>) -> Self {
        Self {
            id: AlarmId::new(id),
            label: label.into(),
            time: time.into(),
            days: Vec::new(),
            enabled: true,
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Apply `patch` in place and stamp `updated_at`
    pub fn apply_patch(&mut self, patch: &AlarmPatch, at: i64) {
        if let Some(label) = &patch.label {
            self.label.clone_from(label);
        }
        if let Some(time) = &patch.time {
            self.time.clone_from(time);
        }
        if let Some(days) = &patch.days {
            self.days.clone_from(days);
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        self.updated_at = self.updated_at.max(at);
    }
}

/// Partial alarm update; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl AlarmPatch {
    pub const fn enabled(enabled: bool) -> Self {
        Self {
            label: None,
            time: None,
            days: None,
            enabled: Some(enabled),
        }
    }

    pub fn time(time: impl Into<String>) -> Self {
        Self {
            time: Some(time.into()),
            ..Self::default()
        }
    }

    pub const fn changes_schedule(&self) -> bool {
        self.time.is_some() || self.days.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(time) = &self.time {
            NaiveTime::parse_from_str(time, "%H:%M")
                .map_err(|_| Error::InvalidInput(format!("alarm time '{time}' is not HH:MM")))?;
        }
        if let Some(days) = &self.days {
            if let Some(day) = days.iter().find(|day| **day > 6) {
                return Err(Error::InvalidInput(format!(
                    "weekday {day} is outside 0-6"
                )));
            }
        }
        Ok(())
    }
}
