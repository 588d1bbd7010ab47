//! Wires storage, transport, and sync services for one CLI session.

use std::path::Path;
use std::sync::Arc;

use reveille_core::clock::{Clock, SystemClock};
use reveille_core::db::{Database, SqliteAlarmStore, SqliteStateStore};
use reveille_core::queue::HubOperationApplier;
use reveille_core::services::{bridge_connectivity, ChannelSignals, LogPresenter, StateStore, TracingAnalytics};
use reveille_core::sync::SyncDeps;
use reveille_core::transport::{Transport, WebSocketTransport};
use reveille_core::{
    ConnectionManager, DeviceId, DeviceIdentity, EventRouter, OfflineQueue, PresenceTracker,
    SyncOrchestrator,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::CliConfig;
use crate::error::CliError;

pub const DEVICE_ID_KEY: &str = "device_id";

/// Open the local database and its state store
pub fn open_state(db_path: &Path) -> Result<(Arc<Mutex<Database>>, SqliteStateStore), CliError> {
    let db = Arc::new(Mutex::new(Database::open(db_path)?));
    let state = SqliteStateStore::new(db.clone());
    Ok((db, state))
}

/// Stored device id, generated and saved on first use
pub async fn load_device_id(state: &dyn StateStore) -> Result<DeviceId, CliError> {
    if let Some(id) = state.load(DEVICE_ID_KEY).await? {
        let id = id.trim();
        if !id.is_empty() {
            return Ok(DeviceId::new(id));
        }
    }

    let id = DeviceId::generate();
    state.save(DEVICE_ID_KEY, id.as_str()).await?;
    tracing::info!(device_id = %id, "Generated new device id");
    Ok(id)
}

pub struct Runtime {
    pub connection: ConnectionManager,
    pub sync: SyncOrchestrator,
    pub queue: Arc<OfflineQueue>,
    pub presence: PresenceTracker,
    auth_token: Option<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Runtime talking to the configured WebSocket hub
    pub async fn build(config: &CliConfig) -> Result<Self, CliError> {
        let Some(hub_url) = config.hub_url.as_deref() else {
            return Err(CliError::HubNotConfigured);
        };
        let transport = WebSocketTransport::new(hub_url)?;
        Self::with_transport(config, Arc::new(transport)).await
    }

    pub async fn with_transport(
        config: &CliConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, CliError> {
        let Some(user_id) = config.user_id.as_deref() else {
            return Err(CliError::HubNotConfigured);
        };

        let db_path = config.resolve_db_path()?;
        let (db, state) = open_state(&db_path)?;
        let state = Arc::new(state);
        let device_id = load_device_id(state.as_ref()).await?;

        let mut identity = DeviceIdentity::new(device_id, user_id);
        if let Some(name) = &config.device_name {
            identity.device_name.clone_from(name);
        }

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let connection = ConnectionManager::new(
            transport,
            EventRouter::new(),
            identity,
            config.sync.reconnect,
            clock.clone(),
        );

        // The CLI has no OS network signal; hub status stands in for it
        let signals = Arc::new(ChannelSignals::new(false));
        let bridge = bridge_connectivity(signals.clone(), connection.subscribe());

        let queue = Arc::new(
            OfflineQueue::load(
                Arc::new(HubOperationApplier::new(connection.clone(), None)),
                state.clone(),
                signals.clone(),
                clock.clone(),
            )
            .await?,
        );
        let queue_listener = queue.spawn_listener();

        let sync = SyncOrchestrator::new(
            connection.clone(),
            queue.clone(),
            SyncDeps {
                alarms: Arc::new(SqliteAlarmStore::new(db)),
                state,
                presenter: Arc::new(LogPresenter),
                analytics: Arc::new(TracingAnalytics),
                clock: clock.clone(),
            },
            config.sync.clone(),
        )
        .await?;

        let presence = PresenceTracker::new(
            connection.clone(),
            signals,
            clock,
            config.sync.heartbeat_interval(),
        );

        tracing::debug!(db_path = %db_path.display(), "Sync runtime ready");
        Ok(Self {
            connection,
            sync,
            queue,
            presence,
            auth_token: config.auth_token.clone(),
            tasks: vec![bridge, queue_listener],
        })
    }

    pub async fn connect(&self) {
        self.connection.initialize(self.auth_token.as_deref()).await;
    }

    /// Stop presence, sync, and background tasks; persists sync state
    pub async fn shutdown(self) -> Result<(), CliError> {
        self.presence.stop();
        let result = self.sync.cleanup().await;
        for task in self.tasks {
            task.abort();
        }
        result?;
        Ok(())
    }
}
