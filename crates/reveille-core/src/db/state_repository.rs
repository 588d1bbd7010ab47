//! Key/value state storage

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};
use tokio::sync::Mutex;

use super::Database;
use crate::error::Result;
use crate::services::StateStore;

/// `StateStore` backed by the `kv_state` table
#[derive(Clone)]
pub struct SqliteStateStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteStateStore {
    pub const fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn load(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let value = db
            .connection()
            .query_row(
                "SELECT value FROM kv_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    async fn save(&self, key: &str, value: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.connection().execute(
            "INSERT OR REPLACE INTO kv_state (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}
