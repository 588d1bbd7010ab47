//! Multi-device sync orchestration.
//!
//! The orchestrator consumes hub events through the router, keeps per-alarm
//! sync status, detects and resolves conflicts (last writer wins), tracks
//! peer devices, and drives full syncs on every (re)connect.

mod conflict;
mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::connection::ConnectionManager;
use crate::events::{
    AlarmChange, AlarmEvent, Event, EventKind, Invocation, PresenceEvent, PresenceStatus,
    SyncEvent, SyncKind, SyncType,
};
use crate::models::{
    AlarmConflict, AlarmId, AlarmPatch, AlarmSyncStatus, DeviceId, DeviceRecord, EntryPayload,
    SyncState,
};
use crate::queue::{OfflineQueue, QueueAction, ALARM_EVENT_KIND};
use crate::router::{HandlerError, ListenerId};
use crate::services::{AlarmStore, AnalyticsSink, NotificationPresenter, StateStore};
use crate::util::lock;
use crate::Result;

pub use conflict::ConflictResolver;
pub use state::{MultiDeviceState, PersistedSyncState, SyncLedger, SYNC_STATE_KEY};

/// Collaborators the orchestrator reads and writes through
#[derive(Clone)]
pub struct SyncDeps {
    pub alarms: Arc<dyn AlarmStore>,
    pub state: Arc<dyn StateStore>,
    pub presenter: Arc<dyn NotificationPresenter>,
    pub analytics: Arc<dyn AnalyticsSink>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FullSyncOutcome {
    Completed { alarms: usize, flushed: usize },
    /// Another full sync was running; nothing was done
    AlreadyRunning,
}

/// What happened to one inbound alarm event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOutcome {
    /// Echo of our own event, or an occurrence with no state change
    Ignored,
    /// Alarm unknown locally; asked the hub for the alarm set
    PartialSyncRequested,
    Applied,
    ConflictResolved { winner: DeviceId },
    /// Resolution failed; left for the sweep
    ConflictUnresolved,
    /// Applying the change failed; status is `error`
    Failed,
}

struct Inner {
    connection: ConnectionManager,
    queue: Arc<OfflineQueue>,
    deps: SyncDeps,
    resolver: ConflictResolver,
    config: SyncConfig,
    ledger: Mutex<SyncLedger>,
    sync_in_progress: AtomicBool,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
    listeners: std::sync::Mutex<Vec<ListenerId>>,
}

/// Clears the single-flight flag when a full sync ends, however it ends
struct SyncFlag<'a>(&'a AtomicBool);

impl Drop for SyncFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    /// Build the orchestrator and restore persisted sync state
    pub async fn new(
        connection: ConnectionManager,
        queue: Arc<OfflineQueue>,
        deps: SyncDeps,
        config: SyncConfig,
    ) -> Result<Self> {
        let raw = deps.state.load(SYNC_STATE_KEY).await?;
        let ledger = SyncLedger::decode(raw.as_deref());
        debug!(
            statuses = ledger.statuses.len(),
            conflicts = ledger.conflicts.len(),
            "Loaded sync state"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                connection,
                queue,
                resolver: ConflictResolver::new(config.conflict_window_ms),
                deps,
                config,
                ledger: Mutex::new(ledger),
                sync_in_progress: AtomicBool::new(false),
                tasks: std::sync::Mutex::new(Vec::new()),
                listeners: std::sync::Mutex::new(Vec::new()),
            }),
        })
    }

    /// Subscribe to hub events and start the event pump and conflict sweep.
    ///
    /// Every `ConnectionStatusChanged(true)` triggers a full sync.
    pub fn start(&self) {
        self.stop_tasks();
        self.remove_listeners();

        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<Event>();
        let router = self.inner.connection.router();
        let mut listeners = Vec::new();
        for kind in EventKind::HUB
            .into_iter()
            .chain([EventKind::ConnectionStatusChanged])
        {
            let events_tx = events_tx.clone();
            listeners.push(router.add_event_listener(kind, move |event| {
                events_tx
                    .send(event.clone())
                    .map_err(|_| HandlerError::new("sync orchestrator stopped"))
            }));
        }
        *lock(&self.inner.listeners) = listeners;

        let pump = {
            let this = self.clone();
            tokio::spawn(async move {
                while let Some(event) = events_rx.recv().await {
                    this.handle_event(event).await;
                }
            })
        };

        let sweep = {
            let this = self.clone();
            let period = self.inner.config.conflict_sweep_interval();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                // The first tick completes immediately
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let resolved = this.resolve_conflicts().await;
                    if resolved > 0 {
                        info!(resolved, "Conflict sweep resolved conflicts");
                    }
                }
            })
        };

        lock(&self.inner.tasks).extend([pump, sweep]);
        info!(device_id = %self.inner.connection.device_id(), "Sync orchestrator started");
    }

    /// Request everything from the hub, drain the offline queue, and mark
    /// every local alarm synced.
    pub async fn perform_full_sync(&self) -> Result<FullSyncOutcome> {
        if self
            .inner
            .sync_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Full sync already running");
            return Ok(FullSyncOutcome::AlreadyRunning);
        }
        let _flag = SyncFlag(&self.inner.sync_in_progress);

        if let Err(error) = self
            .inner
            .connection
            .send_event(Invocation::RequestSync(SyncType::All))
        {
            debug!(error = %error, "Full sync request not sent");
        }

        let flushed = match self.inner.queue.flush().await {
            Ok(report) => report.applied,
            Err(error) => {
                warn!(error = %error, "Offline queue flush failed during full sync");
                0
            }
        };

        let alarms = self.inner.deps.alarms.list().await?;
        let now = self.now();
        let me = self.inner.connection.device_id().clone();
        let mut ledger = self.inner.ledger.lock().await;
        for alarm in &alarms {
            let status = ledger.status_mut(&alarm.id);
            status.bump_version();
            status.mark_synced(me.clone(), now);
        }
        ledger.last_full_sync = Some(now);
        self.save(&ledger).await?;

        info!(alarms = alarms.len(), flushed, "Full sync completed");
        Ok(FullSyncOutcome::Completed {
            alarms: alarms.len(),
            flushed,
        })
    }

    /// Apply one alarm event from another device
    pub async fn handle_remote_alarm_event(&self, event: &AlarmEvent) -> RemoteOutcome {
        if event.device_id == *self.inner.connection.device_id() {
            debug!(alarm_id = %event.alarm_id, "Ignoring echo of own alarm event");
            return RemoteOutcome::Ignored;
        }

        if !event.change.is_mutation() {
            let mut ledger = self.inner.ledger.lock().await;
            ledger.touch_device(&event.device_id, true, event.timestamp);
            self.persist_quietly(&ledger).await;
            drop(ledger);
            self.inner.deps.analytics.track(
                "remote_alarm_occurrence",
                json!({
                    "alarmId": event.alarm_id,
                    "change": event.change.name(),
                    "deviceId": event.device_id,
                }),
            );
            return RemoteOutcome::Ignored;
        }

        let alarm_id = &event.alarm_id;
        let local = match self.inner.deps.alarms.get(alarm_id).await {
            Ok(local) => local,
            Err(error) => {
                warn!(%alarm_id, error = %error, "Failed to read local alarm");
                let mut ledger = self.inner.ledger.lock().await;
                ledger.status_mut(alarm_id).state = SyncState::Error;
                self.persist_quietly(&ledger).await;
                return RemoteOutcome::Failed;
            }
        };

        let mut ledger = self.inner.ledger.lock().await;
        ledger.touch_device(&event.device_id, true, event.timestamp);

        if local.is_none() && !matches!(event.change, AlarmChange::Created { .. }) {
            let status = ledger.status_mut(alarm_id);
            status.state = SyncState::Pending;
            status.raise_version(event.version);
            self.persist_quietly(&ledger).await;
            drop(ledger);

            info!(%alarm_id, "Remote change for unknown alarm; requesting alarm sync");
            if let Err(error) = self
                .inner
                .connection
                .send_event(Invocation::RequestSync(SyncType::Alarms))
            {
                debug!(error = %error, "Partial sync request not sent");
            }
            return RemoteOutcome::PartialSyncRequested;
        }

        let status = ledger.status_mut(alarm_id).clone();
        let outcome = if self.inner.resolver.is_conflict(&status, event) {
            info!(%alarm_id, remote = %event.device_id, "Conflicting alarm update detected");
            let conflict = self.inner.resolver.build(
                self.inner.connection.device_id(),
                &status,
                local,
                event,
                self.now(),
            );
            ledger.record_conflict(conflict);
            ledger.status_mut(alarm_id).state = SyncState::Conflict;
            self.resolve_locked(&mut ledger, alarm_id).await
        } else {
            match apply_change(self.inner.deps.alarms.as_ref(), alarm_id, &event.change).await {
                Ok(()) => {
                    let now = self.now();
                    let status = ledger.status_mut(alarm_id);
                    status.bump_version();
                    status.raise_version(event.version);
                    status.mark_synced(event.device_id.clone(), now);
                    debug!(%alarm_id, version = status.version, "Applied remote alarm change");
                    RemoteOutcome::Applied
                }
                Err(error) => {
                    warn!(%alarm_id, error = %error, "Failed to apply remote alarm change");
                    ledger.status_mut(alarm_id).state = SyncState::Error;
                    RemoteOutcome::Failed
                }
            }
        };

        self.persist_quietly(&ledger).await;
        outcome
    }

    /// Resolve the open conflict for `alarm_id`, if any
    pub async fn auto_resolve_conflict(&self, alarm_id: &AlarmId) -> RemoteOutcome {
        let mut ledger = self.inner.ledger.lock().await;
        let outcome = self.resolve_locked(&mut ledger, alarm_id).await;
        self.persist_quietly(&ledger).await;
        outcome
    }

    /// Retry every unresolved conflict. Returns how many were resolved.
    pub async fn resolve_conflicts(&self) -> usize {
        let mut ledger = self.inner.ledger.lock().await;
        let pending = ledger.unresolved_alarm_ids();
        if pending.is_empty() {
            return 0;
        }

        let mut resolved = 0;
        for alarm_id in &pending {
            if matches!(
                self.resolve_locked(&mut ledger, alarm_id).await,
                RemoteOutcome::ConflictResolved { .. }
            ) {
                resolved += 1;
            }
        }
        self.persist_quietly(&ledger).await;
        resolved
    }

    /// Apply `change` locally, then broadcast it.
    ///
    /// An undelivered event leaves the alarm `pending` and is queued for the
    /// next flush. Returns the resulting sync state.
    pub async fn send_alarm_update(
        &self,
        alarm_id: &AlarmId,
        change: AlarmChange,
    ) -> Result<SyncState> {
        apply_change(self.inner.deps.alarms.as_ref(), alarm_id, &change).await?;

        let now = self.now();
        let identity = self.inner.connection.identity();
        let mut ledger = self.inner.ledger.lock().await;
        let status = ledger.status_mut(alarm_id);
        let version = if change.is_mutation() {
            status.bump_version()
        } else {
            status.version
        };
        let event = AlarmEvent {
            alarm_id: alarm_id.clone(),
            user_id: identity.user_id.clone(),
            device_id: identity.device_id.clone(),
            timestamp: now,
            version,
            change,
        };
        if event.change.is_mutation() {
            status.mark_synced(identity.device_id.clone(), now);
        }

        let state = match self
            .inner
            .connection
            .send_event(Invocation::SendAlarmEvent(event.clone()))
        {
            Ok(()) => ledger.status_mut(alarm_id).state,
            Err(error) => {
                info!(%alarm_id, error = %error, "Alarm update not delivered; queueing");
                if event.change.is_mutation() {
                    ledger.status_mut(alarm_id).state = SyncState::Pending;
                }
                self.save(&ledger).await?;
                drop(ledger);
                self.inner
                    .queue
                    .enqueue(
                        queue_action(&event.change),
                        ALARM_EVENT_KIND,
                        serde_json::to_value(&event)?,
                    )
                    .await?;
                return Ok(self
                    .status(alarm_id)
                    .await
                    .map_or(SyncState::Pending, |status| status.state));
            }
        };

        self.save(&ledger).await?;
        Ok(state)
    }

    pub async fn status(&self, alarm_id: &AlarmId) -> Option<AlarmSyncStatus> {
        self.inner.ledger.lock().await.statuses.get(alarm_id).cloned()
    }

    pub async fn conflicts(&self) -> Vec<AlarmConflict> {
        self.inner.ledger.lock().await.conflicts.clone()
    }

    pub async fn devices(&self) -> Vec<DeviceRecord> {
        self.inner
            .ledger
            .lock()
            .await
            .devices
            .values()
            .cloned()
            .collect()
    }

    pub async fn snapshot(&self) -> PersistedSyncState {
        self.inner.ledger.lock().await.to_persisted()
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.sync_in_progress.load(Ordering::SeqCst)
    }

    pub async fn persist(&self) -> Result<()> {
        let ledger = self.inner.ledger.lock().await;
        self.save(&ledger).await
    }

    /// Stop background work, unsubscribe, disconnect, and persist state
    pub async fn cleanup(&self) -> Result<()> {
        self.stop_tasks();
        self.remove_listeners();
        self.inner.connection.disconnect().await;
        self.persist().await?;
        info!("Sync orchestrator stopped");
        Ok(())
    }

    async fn handle_event(&self, event: Event) {
        match event {
            Event::AlarmTriggered(alarm_event)
            | Event::AlarmDismissed(alarm_event)
            | Event::AlarmSnoozed(alarm_event)
            | Event::AlarmUpdated(alarm_event) => {
                self.handle_remote_alarm_event(&alarm_event).await;
            }
            Event::DeviceSync(sync_event) => self.handle_sync_event(&sync_event, true).await,
            Event::SyncComplete(sync_event) => self.handle_sync_event(&sync_event, false).await,
            Event::SystemNotification(notification) => {
                self.inner.deps.presenter.show(&notification);
            }
            Event::UserPresenceUpdate(presence) => self.handle_presence(&presence).await,
            Event::ConnectionStatusChanged { connected: true } => {
                let this = self.clone();
                tokio::spawn(async move {
                    if let Err(error) = this.perform_full_sync().await {
                        warn!(error = %error, "Full sync after connect failed");
                    }
                });
            }
            Event::ConnectionStatusChanged { connected: false } => {
                debug!("Hub offline; local changes will queue");
            }
        }
    }

    async fn handle_sync_event(&self, event: &SyncEvent, counts_as_sync: bool) {
        if event.device_id == *self.inner.connection.device_id() {
            return;
        }
        let online = !matches!(event.kind, SyncKind::DeviceOffline);
        {
            let mut ledger = self.inner.ledger.lock().await;
            if counts_as_sync {
                ledger.record_device_sync(&event.device_id, online, event.timestamp);
            } else {
                ledger.touch_device(&event.device_id, online, event.timestamp);
            }
            self.persist_quietly(&ledger).await;
        }

        match &event.kind {
            SyncKind::AlarmChanged { event } => {
                self.handle_remote_alarm_event(event).await;
            }
            SyncKind::SyncCompleted { sync_type } => {
                info!(device_id = %event.device_id, ?sync_type, "Peer completed sync");
            }
            SyncKind::SyncRequested { sync_type } => {
                debug!(device_id = %event.device_id, ?sync_type, "Peer requested sync");
            }
            SyncKind::DeviceOnline | SyncKind::DeviceOffline => {
                info!(device_id = %event.device_id, online, "Peer device status changed");
            }
        }
    }

    async fn handle_presence(&self, presence: &PresenceEvent) {
        if presence.device_id == *self.inner.connection.device_id() {
            return;
        }
        let mut ledger = self.inner.ledger.lock().await;
        ledger.touch_device(
            &presence.device_id,
            presence.status != PresenceStatus::Offline,
            presence.timestamp,
        );
        self.persist_quietly(&ledger).await;
    }

    /// Last-writer-wins resolution with the ledger already locked
    async fn resolve_locked(&self, ledger: &mut SyncLedger, alarm_id: &AlarmId) -> RemoteOutcome {
        let Some(conflict) = ledger.unresolved_conflict_mut(alarm_id) else {
            return RemoteOutcome::Ignored;
        };
        let Some(winner) = conflict.winner().cloned() else {
            return RemoteOutcome::ConflictUnresolved;
        };
        let max_version = conflict.max_version();
        let conflict_type = conflict.conflict_type;

        if winner.device_id != *self.inner.connection.device_id() {
            let applied = match &winner.payload {
                EntryPayload::Change(change) => {
                    apply_change(self.inner.deps.alarms.as_ref(), alarm_id, change).await
                }
                EntryPayload::Snapshot(Some(alarm)) => self.inner.deps.alarms.upsert(alarm).await,
                EntryPayload::Snapshot(None) => self
                    .inner
                    .deps
                    .alarms
                    .remove(alarm_id)
                    .await
                    .map(|_| ()),
            };
            if let Err(error) = applied {
                warn!(%alarm_id, error = %error, "Conflict resolution failed; will retry");
                ledger.status_mut(alarm_id).state = SyncState::Error;
                return RemoteOutcome::ConflictUnresolved;
            }
        }

        let now = self.now();
        if let Some(conflict) = ledger.unresolved_conflict_mut(alarm_id) {
            conflict.mark_resolved(winner.device_id.clone(), now);
        }
        let status = ledger.status_mut(alarm_id);
        status.raise_version(max_version);
        status.mark_synced(winner.device_id.clone(), now);
        ledger.prune_conflicts(self.inner.config.conflict_history_limit);

        info!(%alarm_id, winner = %winner.device_id, version = max_version, "Conflict resolved");
        self.inner.deps.analytics.track(
            "sync_conflict_resolved",
            json!({
                "alarmId": alarm_id,
                "conflictType": conflict_type,
                "winner": winner.device_id,
                "version": max_version,
            }),
        );
        RemoteOutcome::ConflictResolved {
            winner: winner.device_id,
        }
    }

    async fn save(&self, ledger: &SyncLedger) -> Result<()> {
        let payload = ledger.encode()?;
        self.inner.deps.state.save(SYNC_STATE_KEY, &payload).await
    }

    async fn persist_quietly(&self, ledger: &SyncLedger) {
        if let Err(error) = self.save(ledger).await {
            warn!(error = %error, "Failed to persist sync state");
        }
    }

    fn stop_tasks(&self) {
        for task in lock(&self.inner.tasks).drain(..) {
            task.abort();
        }
    }

    fn remove_listeners(&self) {
        let listeners: Vec<ListenerId> = lock(&self.inner.listeners).drain(..).collect();
        let router = self.inner.connection.router();
        for id in listeners {
            router.remove_event_listener(id);
        }
    }

    fn now(&self) -> i64 {
        self.inner.deps.clock.now_millis()
    }
}

/// Apply a mutation to the local store; occurrences are a no-op
async fn apply_change(
    alarms: &dyn AlarmStore,
    alarm_id: &AlarmId,
    change: &AlarmChange,
) -> Result<()> {
    match change {
        AlarmChange::Enabled => {
            alarms.update(alarm_id, &AlarmPatch::enabled(true)).await?;
        }
        AlarmChange::Disabled => {
            alarms.update(alarm_id, &AlarmPatch::enabled(false)).await?;
        }
        AlarmChange::Updated { patch } => {
            alarms.update(alarm_id, patch).await?;
        }
        AlarmChange::Created { alarm } => alarms.upsert(alarm).await?,
        AlarmChange::Deleted => {
            alarms.remove(alarm_id).await?;
        }
        AlarmChange::Triggered | AlarmChange::Dismissed | AlarmChange::Snoozed { .. } => {}
    }
    Ok(())
}

const fn queue_action(change: &AlarmChange) -> QueueAction {
    match change {
        AlarmChange::Created { .. } => QueueAction::Create,
        AlarmChange::Deleted => QueueAction::Delete,
        _ => QueueAction::Update,
    }
}
