//! Alarm storage

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension, Row};
use tokio::sync::Mutex;

use super::Database;
use crate::error::{Error, Result};
use crate::models::{Alarm, AlarmId, AlarmPatch};
use crate::services::AlarmStore;

const SELECT_ALARM: &str = "SELECT id, label, time, days, enabled, updated_at FROM alarms";

/// `AlarmStore` backed by the `alarms` table
#[derive(Clone)]
pub struct SqliteAlarmStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteAlarmStore {
    pub const fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }
}

fn row_to_alarm(row: &Row<'_>) -> rusqlite::Result<(Alarm, String)> {
    let days: String = row.get(3)?;
    Ok((
        Alarm {
            id: AlarmId::new(row.get::<_, String>(0)?),
            label: row.get(1)?,
            time: row.get(2)?,
            days: Vec::new(),
            enabled: row.get(4)?,
            updated_at: row.get(5)?,
        },
        days,
    ))
}

fn decode_days((mut alarm, days): (Alarm, String)) -> Result<Alarm> {
    alarm.days = serde_json::from_str(&days)?;
    Ok(alarm)
}

fn write_alarm(db: &Database, alarm: &Alarm) -> Result<()> {
    db.connection().execute(
        "INSERT OR REPLACE INTO alarms (id, label, time, days, enabled, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            alarm.id.as_str(),
            alarm.label,
            alarm.time,
            serde_json::to_string(&alarm.days)?,
            alarm.enabled,
            alarm.updated_at,
        ],
    )?;
    Ok(())
}

fn read_alarm(db: &Database, id: &AlarmId) -> Result<Option<Alarm>> {
    db.connection()
        .query_row(
            &format!("{SELECT_ALARM} WHERE id = ?1"),
            params![id.as_str()],
            row_to_alarm,
        )
        .optional()?
        .map(decode_days)
        .transpose()
}

#[async_trait]
impl AlarmStore for SqliteAlarmStore {
    async fn get(&self, id: &AlarmId) -> Result<Option<Alarm>> {
        let db = self.db.lock().await;
        read_alarm(&db, id)
    }

    async fn list(&self) -> Result<Vec<Alarm>> {
        let db = self.db.lock().await;
        let mut stmt = db
            .connection()
            .prepare(&format!("{SELECT_ALARM} ORDER BY time ASC, id ASC"))?;
        let alarms = stmt
            .query_map([], row_to_alarm)?
            .map(|row| decode_days(row?))
            .collect::<Result<Vec<_>>>()?;
        Ok(alarms)
    }

    async fn update(&self, id: &AlarmId, patch: &AlarmPatch) -> Result<Alarm> {
        patch.validate()?;
        let db = self.db.lock().await;
        let mut alarm = read_alarm(&db, id)?.ok_or_else(|| Error::NotFound(format!("alarm {id}")))?;
        alarm.apply_patch(patch, chrono::Utc::now().timestamp_millis());
        write_alarm(&db, &alarm)?;
        Ok(alarm)
    }

    async fn upsert(&self, alarm: &Alarm) -> Result<()> {
        let db = self.db.lock().await;
        write_alarm(&db, alarm)
    }

    async fn remove(&self, id: &AlarmId) -> Result<bool> {
        let db = self.db.lock().await;
        let removed = db
            .connection()
            .execute("DELETE FROM alarms WHERE id = ?1", params![id.as_str()])?;
        Ok(removed > 0)
    }
}
