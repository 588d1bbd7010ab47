//! Durable FIFO of operations waiting for connectivity.
//!
//! Operations are persisted under [`QUEUE_STATE_KEY`] on every change and
//! removed only after the [`OperationApplier`] accepts them.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::connection::ConnectionManager;
use crate::events::{AlarmEvent, Invocation};
use crate::services::{EntityApi, EnvironmentSignals, Signal, StateStore};
use crate::{Error, Result};

pub const QUEUE_STATE_KEY: &str = "offline_queue";
pub const BACKGROUND_SYNC_TAG: &str = "offline-sync";
/// Entity kind of queued outbound alarm events
pub const ALARM_EVENT_KIND: &str = "alarm-event";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueAction {
    Create,
    Update,
    Delete,
}

impl QueueAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for QueueAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    pub id: String,
    pub action: QueueAction,
    pub entity_kind: String,
    pub payload: Value,
    /// Unix ms
    pub enqueued_at: i64,
}

/// Delivers one queued operation
#[async_trait]
pub trait OperationApplier: Send + Sync {
    async fn apply(&self, operation: &QueuedOperation) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub attempted: usize,
    pub applied: usize,
    pub failed: usize,
    pub remaining: usize,
}

pub struct OfflineQueue {
    operations: Mutex<VecDeque<QueuedOperation>>,
    flushing: Mutex<()>,
    applier: Arc<dyn OperationApplier>,
    store: Arc<dyn StateStore>,
    signals: Arc<dyn EnvironmentSignals>,
    clock: Arc<dyn Clock>,
    awaiting_online: AtomicBool,
}

impl OfflineQueue {
    /// Build the queue and restore persisted operations
    pub async fn load(
        applier: Arc<dyn OperationApplier>,
        store: Arc<dyn StateStore>,
        signals: Arc<dyn EnvironmentSignals>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let operations = match store.load(QUEUE_STATE_KEY).await? {
            Some(raw) => serde_json::from_str::<VecDeque<QueuedOperation>>(&raw)
                .unwrap_or_else(|error| {
                    warn!(error = %error, "Discarding unreadable offline queue");
                    VecDeque::new()
                }),
            None => VecDeque::new(),
        };
        if !operations.is_empty() {
            info!(count = operations.len(), "Restored offline operations");
        }

        Ok(Self {
            operations: Mutex::new(operations),
            flushing: Mutex::new(()),
            applier,
            store,
            signals,
            clock,
            awaiting_online: AtomicBool::new(false),
        })
    }

    /// Queue an operation and try to deliver it.
    ///
    /// Online, the queue is flushed right away. Offline, delivery waits for
    /// a background sync callback, or a connectivity signal when the
    /// platform has no background sync.
    pub async fn enqueue(
        &self,
        action: QueueAction,
        entity_kind: &str,
        payload: Value,
    ) -> Result<String> {
        let enqueued_at = self.clock.now_millis();
        let id = {
            let mut operations = self.operations.lock().await;
            let base = format!("{entity_kind}-{action}-{enqueued_at}");
            let mut id = base.clone();
            let mut suffix = 1;
            while operations.iter().any(|operation| operation.id == id) {
                id = format!("{base}-{suffix}");
                suffix += 1;
            }
            operations.push_back(QueuedOperation {
                id: id.clone(),
                action,
                entity_kind: entity_kind.to_string(),
                payload,
                enqueued_at,
            });
            self.persist(&operations).await?;
            id
        };
        debug!(%id, "Queued offline operation");

        if self.signals.is_online() {
            self.flush().await?;
        } else if self.signals.register_background_sync(BACKGROUND_SYNC_TAG) {
            debug!(tag = BACKGROUND_SYNC_TAG, "Registered background sync");
        } else {
            self.awaiting_online.store(true, Ordering::SeqCst);
        }
        Ok(id)
    }

    /// Try every operation queued at call time, in order.
    ///
    /// Failures stay queued for the next flush. A flush already in progress
    /// makes this call return an empty report.
    pub async fn flush(&self) -> Result<FlushReport> {
        let Ok(_flushing) = self.flushing.try_lock() else {
            debug!("Offline queue flush already running");
            return Ok(FlushReport::default());
        };

        let snapshot: Vec<QueuedOperation> = self.operations.lock().await.iter().cloned().collect();
        let mut report = FlushReport {
            attempted: snapshot.len(),
            ..FlushReport::default()
        };

        for operation in &snapshot {
            match self.applier.apply(operation).await {
                Ok(()) => {
                    report.applied += 1;
                    let mut operations = self.operations.lock().await;
                    operations.retain(|queued| queued.id != operation.id);
                    self.persist(&operations).await?;
                }
                Err(error) => {
                    report.failed += 1;
                    warn!(id = %operation.id, error = %error, "Offline operation failed; keeping it queued");
                }
            }
        }

        report.remaining = self.operations.lock().await.len();
        if report.remaining == 0 {
            self.awaiting_online.store(false, Ordering::SeqCst);
        }
        if report.attempted > 0 {
            info!(
                applied = report.applied,
                failed = report.failed,
                remaining = report.remaining,
                "Flushed offline queue"
            );
        }
        Ok(report)
    }

    pub async fn pending(&self) -> Vec<QueuedOperation> {
        self.operations.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.operations.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.operations.lock().await.is_empty()
    }

    /// Flush when connectivity returns or a background sync fires
    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let mut signals = self.signals.subscribe();
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let trigger = match signals.recv().await {
                    Ok(Signal::Connectivity(true)) => {
                        queue.awaiting_online.swap(false, Ordering::SeqCst)
                    }
                    Ok(Signal::BackgroundSync(tag)) => tag == BACKGROUND_SYNC_TAG,
                    Ok(_) => false,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Offline queue listener lagged");
                        true
                    }
                    Err(RecvError::Closed) => break,
                };
                if !trigger {
                    continue;
                }
                match queue.flush().await {
                    Ok(report) if report.remaining > 0 => {
                        queue.awaiting_online.store(true, Ordering::SeqCst);
                    }
                    Ok(_) => {}
                    Err(error) => {
                        warn!(error = %error, "Offline queue flush failed");
                        queue.awaiting_online.store(true, Ordering::SeqCst);
                    }
                }
            }
        })
    }

    async fn persist(&self, operations: &VecDeque<QueuedOperation>) -> Result<()> {
        let payload = serde_json::to_string(operations)?;
        self.store.save(QUEUE_STATE_KEY, &payload).await
    }
}

/// Delivers alarm events over the hub and everything else through the REST API
pub struct HubOperationApplier {
    connection: ConnectionManager,
    entity_api: Option<Arc<dyn EntityApi>>,
}

impl HubOperationApplier {
    pub fn new(connection: ConnectionManager, entity_api: Option<Arc<dyn EntityApi>>) -> Self {
        Self {
            connection,
            entity_api,
        }
    }
}

#[async_trait]
impl OperationApplier for HubOperationApplier {
    async fn apply(&self, operation: &QueuedOperation) -> Result<()> {
        if operation.entity_kind == ALARM_EVENT_KIND {
            let event: AlarmEvent = serde_json::from_value(operation.payload.clone())?;
            return self
                .connection
                .send_event(Invocation::SendAlarmEvent(event))
                .map_err(|error| Error::Remote(error.to_string()));
        }

        let Some(api) = &self.entity_api else {
            return Err(Error::Remote(format!(
                "no API configured for {}",
                operation.entity_kind
            )));
        };
        match operation.action {
            QueueAction::Create => api.create(&operation.entity_kind, &operation.payload).await,
            QueueAction::Update => api.update(&operation.entity_kind, &operation.payload).await,
            QueueAction::Delete => api.delete(&operation.entity_kind, &operation.payload).await,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::services::{ChannelSignals, MemoryStateStore};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    /// Records applied ids; ids in `failing` are rejected
    #[derive(Default)]
    pub(crate) struct RecordingApplier {
        pub applied: StdMutex<Vec<String>>,
        pub failing: StdMutex<HashSet<String>>,
    }

    #[async_trait]
    impl OperationApplier for RecordingApplier {
        async fn apply(&self, operation: &QueuedOperation) -> Result<()> {
            if self.failing.lock().unwrap().contains(&operation.id) {
                return Err(Error::Remote("rejected".to_string()));
            }
            self.applied.lock().unwrap().push(operation.id.clone());
            Ok(())
        }
    }

    struct Harness {
        queue: Arc<OfflineQueue>,
        applier: Arc<RecordingApplier>,
        store: Arc<MemoryStateStore>,
        signals: Arc<ChannelSignals>,
        clock: Arc<ManualClock>,
    }

    async fn harness(signals: ChannelSignals) -> Harness {
        let applier = Arc::new(RecordingApplier::default());
        let store = Arc::new(MemoryStateStore::new());
        let signals = Arc::new(signals);
        let clock = Arc::new(ManualClock::new(1_000));
        let queue = OfflineQueue::load(
            applier.clone(),
            store.clone(),
            signals.clone(),
            clock.clone(),
        )
        .await
        .unwrap();
        Harness {
            queue: Arc::new(queue),
            applier,
            store,
            signals,
            clock,
        }
    }

    #[tokio::test]
    async fn failed_item_is_the_only_one_left() {
        let h = harness(ChannelSignals::new(false)).await;
        let mut ids = Vec::new();
        for n in 0..3 {
            ids.push(
                h.queue
                    .enqueue(QueueAction::Create, "note", json!({ "n": n }))
                    .await
                    .unwrap(),
            );
            h.clock.advance(1);
        }
        h.applier.failing.lock().unwrap().insert(ids[1].clone());

        let report = h.queue.flush().await.unwrap();

        assert_eq!(
            report,
            FlushReport {
                attempted: 3,
                applied: 2,
                failed: 1,
                remaining: 1
            }
        );
        let pending: Vec<String> = h.queue.pending().await.into_iter().map(|op| op.id).collect();
        assert_eq!(pending, vec![ids[1].clone()]);
        assert_eq!(
            *h.applier.applied.lock().unwrap(),
            vec![ids[0].clone(), ids[2].clone()]
        );
    }

    #[tokio::test]
    async fn offline_enqueue_flushes_once_online() {
        let h = harness(ChannelSignals::new(false)).await;
        let listener = h.queue.spawn_listener();

        let id = h
            .queue
            .enqueue(QueueAction::Create, "alarm", json!({ "id": "a1" }))
            .await
            .unwrap();
        assert_eq!(id, "alarm-create-1000");
        assert_eq!(h.queue.len().await, 1);
        assert!(h.applier.applied.lock().unwrap().is_empty());

        h.signals.emit(Signal::Connectivity(true));
        for _ in 0..100 {
            if h.queue.is_empty().await {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(h.queue.is_empty().await);
        assert_eq!(*h.applier.applied.lock().unwrap(), vec![id]);
        assert_eq!(h.store.raw(QUEUE_STATE_KEY).as_deref(), Some("[]"));
        listener.abort();
    }

    #[tokio::test]
    async fn background_sync_is_preferred_when_available() {
        let h = harness(ChannelSignals::new(false).with_background_sync()).await;
        let listener = h.queue.spawn_listener();

        h.queue
            .enqueue(QueueAction::Update, "settings", json!({}))
            .await
            .unwrap();
        assert_eq!(h.signals.registered_tags(), vec![BACKGROUND_SYNC_TAG.to_string()]);

        // Connectivity alone does not flush; the background sync does
        h.signals.emit(Signal::Connectivity(true));
        tokio::task::yield_now().await;
        assert_eq!(h.signals.fire_background_sync(), 1);
        for _ in 0..100 {
            if h.queue.is_empty().await {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(h.queue.is_empty().await);
        listener.abort();
    }

    #[tokio::test]
    async fn online_enqueue_delivers_immediately() {
        let h = harness(ChannelSignals::new(true)).await;
        h.queue
            .enqueue(QueueAction::Delete, "alarm", json!({ "id": "a1" }))
            .await
            .unwrap();
        assert!(h.queue.is_empty().await);
        assert_eq!(h.applier.applied.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_ids_get_a_suffix() {
        let h = harness(ChannelSignals::new(false)).await;
        let first = h
            .queue
            .enqueue(QueueAction::Create, "note", json!({}))
            .await
            .unwrap();
        let second = h
            .queue
            .enqueue(QueueAction::Create, "note", json!({}))
            .await
            .unwrap();
        assert_eq!(first, "note-create-1000");
        assert_eq!(second, "note-create-1000-1");
    }

    #[tokio::test]
    async fn restores_persisted_operations_and_ignores_garbage() {
        let h = harness(ChannelSignals::new(false)).await;
        h.queue
            .enqueue(QueueAction::Create, "note", json!({ "body": "hi" }))
            .await
            .unwrap();

        let restored = OfflineQueue::load(
            h.applier.clone(),
            h.store.clone(),
            h.signals.clone(),
            h.clock.clone(),
        )
        .await
        .unwrap();
        assert_eq!(restored.pending().await, h.queue.pending().await);

        h.store.insert(QUEUE_STATE_KEY, "{not json");
        let degraded = OfflineQueue::load(
            h.applier.clone(),
            h.store.clone(),
            h.signals.clone(),
            h.clock.clone(),
        )
        .await
        .unwrap();
        assert!(degraded.is_empty().await);
    }
}
