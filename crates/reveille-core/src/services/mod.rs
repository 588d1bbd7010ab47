//! Collaborators the sync client talks to but does not own.
//!
//! Each concern sits behind a trait so interfaces can plug in their own
//! storage, notification surface, analytics sink, or platform signals.

mod log;
mod memory;
mod signals;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::events::NotificationEvent;
use crate::models::{Alarm, AlarmId, AlarmPatch};
use crate::Result;

pub use log::{LogPresenter, NoopAnalytics, TracingAnalytics};
pub use memory::{MemoryAlarmStore, MemoryStateStore};
pub use signals::{bridge_connectivity, ChannelSignals};

/// Local alarm storage
#[async_trait]
pub trait AlarmStore: Send + Sync {
    async fn get(&self, id: &AlarmId) -> Result<Option<Alarm>>;

    async fn list(&self) -> Result<Vec<Alarm>>;

    /// Patch an existing alarm. Fails with `NotFound` when it does not exist.
    async fn update(&self, id: &AlarmId, patch: &AlarmPatch) -> Result<Alarm>;

    async fn upsert(&self, alarm: &Alarm) -> Result<()>;

    /// Returns whether an alarm was removed
    async fn remove(&self, id: &AlarmId) -> Result<bool>;
}

/// Durable key/value storage for serialized client state
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<String>>;

    async fn save(&self, key: &str, value: &str) -> Result<()>;
}

/// Surface for user-visible notifications
pub trait NotificationPresenter: Send + Sync {
    fn show(&self, notification: &NotificationEvent);
}

pub trait AnalyticsSink: Send + Sync {
    fn track(&self, name: &str, properties: Value);
}

/// Remote API used to replay queued non-alarm operations
#[async_trait]
pub trait EntityApi: Send + Sync {
    async fn create(&self, kind: &str, payload: &Value) -> Result<()>;

    async fn update(&self, kind: &str, payload: &Value) -> Result<()>;

    async fn delete(&self, kind: &str, payload: &Value) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Platform signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Visibility(Visibility),
    /// Window focus gained (`true`) or lost
    Focus(bool),
    /// Network connectivity changed
    Connectivity(bool),
    /// A registered background sync fired
    BackgroundSync(String),
}

/// Platform signals: visibility, focus, connectivity, background sync
pub trait EnvironmentSignals: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<Signal>;

    fn is_online(&self) -> bool;

    /// Ask the platform to fire `Signal::BackgroundSync(tag)` once online.
    ///
    /// Returns `false` when background sync is unavailable.
    fn register_background_sync(&self, _tag: &str) -> bool {
        false
    }
}
