//! reveille-core - Core library for Reveille
//!
//! This crate contains the multi-device sync client shared by every Reveille
//! interface: the hub connection manager, the typed event router, presence
//! announcements, the offline operation queue, and the sync orchestrator with
//! its conflict resolver.

pub mod clock;
pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod events;
pub mod models;
pub mod presence;
pub mod queue;
pub mod router;
pub mod services;
pub mod sync;
pub mod transport;
pub mod util;

pub use config::{ReconnectPolicy, SyncConfig};
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionStatus, DeviceIdentity};
pub use error::{Error, Result};
pub use models::{Alarm, AlarmId, AlarmPatch, DeviceId};
pub use presence::PresenceTracker;
pub use queue::OfflineQueue;
pub use router::EventRouter;
pub use sync::SyncOrchestrator;
