//! In-memory stores for tests and ephemeral sessions.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{AlarmStore, StateStore};
use crate::models::{Alarm, AlarmId, AlarmPatch};
use crate::util::lock;
use crate::{Error, Result};

#[derive(Debug, Default)]
pub struct MemoryAlarmStore {
    alarms: Mutex<BTreeMap<AlarmId, Alarm>>,
}

impl MemoryAlarmStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alarms(alarms: impl IntoIterator<Item = Alarm>) -> Self {
        Self {
            alarms: Mutex::new(
                alarms
                    .into_iter()
                    .map(|alarm| (alarm.id.clone(), alarm))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl AlarmStore for MemoryAlarmStore {
    async fn get(&self, id: &AlarmId) -> Result<Option<Alarm>> {
        Ok(lock(&self.alarms).get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Alarm>> {
        Ok(lock(&self.alarms).values().cloned().collect())
    }

    async fn update(&self, id: &AlarmId, patch: &AlarmPatch) -> Result<Alarm> {
        patch.validate()?;
        let mut alarms = lock(&self.alarms);
        let alarm = alarms
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("alarm {id}")))?;
        alarm.apply_patch(patch, chrono::Utc::now().timestamp_millis());
        Ok(alarm.clone())
    }

    async fn upsert(&self, alarm: &Alarm) -> Result<()> {
        lock(&self.alarms).insert(alarm.id.clone(), alarm.clone());
        Ok(())
    }

    async fn remove(&self, id: &AlarmId) -> Result<bool> {
        Ok(lock(&self.alarms).remove(id).is_some())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw value, e.g. to simulate state left by an older build
    pub fn insert(&self, key: &str, value: impl Into<String>) {
        lock(&self.values).insert(key.to_string(), value.into());
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.raw(key))
    }

    async fn save(&self, key: &str, value: &str) -> Result<()> {
        self.insert(key, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_missing_alarm_is_not_found() {
        let store = MemoryAlarmStore::new();
        let error = store
            .update(&AlarmId::new("missing"), &AlarmPatch::enabled(false))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn update_applies_patch() {
        let store = MemoryAlarmStore::with_alarms([Alarm::new("a1", "Wake", "07:00")]);
        let updated = store
            .update(&AlarmId::new("a1"), &AlarmPatch::time("06:45"))
            .await
            .unwrap();
        assert_eq!(updated.time, "06:45");
        assert!(updated.enabled);
        assert!(store.remove(&AlarmId::new("a1")).await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn state_store_round_trips_values() {
        let store = MemoryStateStore::new();
        assert_eq!(store.load("k").await.unwrap(), None);
        store.save("k", "v").await.unwrap();
        assert_eq!(store.load("k").await.unwrap().as_deref(), Some("v"));
    }
}
