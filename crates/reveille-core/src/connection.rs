//! Hub connection lifecycle: auth, reconnect with backoff, device registration.
//!
//! State machine:
//! `Disconnected -> Connecting -> Connected -> Reconnecting -> {Connected | Disconnected}`.
//! After `max_attempts` failed retries the manager stays `Disconnected` and
//! publishes [`ConnectionEvent::GaveUp`]; only a new `initialize` restarts it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::ReconnectPolicy;
use crate::events::{DeviceRegistration, Event, HubFrame, Invocation};
use crate::models::DeviceId;
use crate::router::EventRouter;
use crate::transport::{Transport, TransportLink};
use crate::util::{lock, normalize_text_option};

const STATUS_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Snapshot of the connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Generated per successful open
    pub connection_id: Option<Uuid>,
    /// Unix ms
    pub last_connected_at: Option<i64>,
    pub reconnect_attempts: u32,
    pub device_id: DeviceId,
}

impl ConnectionState {
    const fn new(device_id: DeviceId) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            connection_id: None,
            last_connected_at: None,
            reconnect_attempts: 0,
            device_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    StatusChanged { connected: bool },
    /// Retries exhausted; the manager stays offline
    GaveUp { attempts: u32 },
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("not connected to the sync hub")]
    NotConnected,
    #[error("failed to encode {target}: {source}")]
    Encode {
        target: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("hub link closed while sending {0}")]
    LinkClosed(&'static str),
}

/// Who this client is, as announced to the hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: DeviceId,
    pub user_id: String,
    pub device_name: String,
    pub platform: String,
}

impl DeviceIdentity {
    pub fn new(device_id: DeviceId, user_id: impl Into<String>) -> Self {
        Self {
            device_id,
            user_id: user_id.into(),
            device_name: "reveille".to_string(),
            platform: std::env::consts::OS.to_string(),
        }
    }

    fn registration(&self) -> DeviceRegistration {
        DeviceRegistration {
            device_id: self.device_id.clone(),
            user_id: self.user_id.clone(),
            device_name: self.device_name.clone(),
            platform: self.platform.clone(),
        }
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    router: EventRouter,
    identity: DeviceIdentity,
    policy: ReconnectPolicy,
    clock: Arc<dyn Clock>,
    state: Mutex<ConnectionState>,
    link: Mutex<Option<mpsc::UnboundedSender<HubFrame>>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<ConnectionEvent>,
}

/// Owns the hub link. Cloning shares the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        router: EventRouter,
        identity: DeviceIdentity,
        policy: ReconnectPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        let state = ConnectionState::new(identity.device_id.clone());
        Self {
            inner: Arc::new(Inner {
                transport,
                router,
                identity,
                policy,
                clock,
                state: Mutex::new(state),
                link: Mutex::new(None),
                supervisor: Mutex::new(None),
                events,
            }),
        }
    }

    /// Open the hub link with `auth_token`.
    ///
    /// Without a token this logs a warning and stays `Disconnected`. A failed
    /// first open falls into the regular retry path.
    pub async fn initialize(&self, auth_token: Option<&str>) {
        let Some(token) = normalize_text_option(auth_token.map(str::to_string)) else {
            warn!("No auth token available; sync hub connection not started");
            return;
        };

        self.stop_supervisor().await;
        {
            let mut state = lock(&self.inner.state);
            state.status = ConnectionStatus::Connecting;
            state.reconnect_attempts = 0;
        }
        debug!("Connecting to sync hub");

        let inbound = match self.inner.transport.open(&token).await {
            Ok(link) => Some(self.inner.on_open(link)),
            Err(error) => {
                warn!(error = %error, "Initial hub connection failed");
                lock(&self.inner.state).status = ConnectionStatus::Reconnecting;
                None
            }
        };

        let supervisor = tokio::spawn(supervise(self.inner.clone(), token, inbound));
        *lock(&self.inner.supervisor) = Some(supervisor);
    }

    /// Send one invocation. Never retains the event when offline.
    pub fn send_event(&self, invocation: Invocation) -> Result<(), SendError> {
        self.inner.send(invocation)
    }

    /// Stop retries, close the link, and reset the connection state
    pub async fn disconnect(&self) {
        self.stop_supervisor().await;
        let had_link = lock(&self.inner.link).take().is_some();
        *lock(&self.inner.state) = ConnectionState::new(self.inner.identity.device_id.clone());
        if had_link {
            self.inner
                .publish(ConnectionEvent::StatusChanged { connected: false });
        }
        info!("Disconnected from sync hub");
    }

    pub fn status(&self) -> ConnectionStatus {
        lock(&self.inner.state).status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.state).clone()
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.inner.identity
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.inner.identity.device_id
    }

    pub fn router(&self) -> &EventRouter {
        &self.inner.router
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    async fn stop_supervisor(&self) {
        let handle = lock(&self.inner.supervisor).take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Inner {
    fn on_open(&self, link: TransportLink) -> mpsc::UnboundedReceiver<HubFrame> {
        *lock(&self.link) = Some(link.outbound);
        let connection_id = Uuid::now_v7();
        {
            let mut state = lock(&self.state);
            state.status = ConnectionStatus::Connected;
            state.connection_id = Some(connection_id);
            state.last_connected_at = Some(self.clock.now_millis());
            state.reconnect_attempts = 0;
        }
        info!(%connection_id, device_id = %self.identity.device_id, "Connected to sync hub");

        if let Err(error) = self.send(Invocation::RegisterDevice(self.identity.registration())) {
            warn!(error = %error, "Device registration failed");
        }
        self.publish(ConnectionEvent::StatusChanged { connected: true });
        link.inbound
    }

    fn on_link_lost(&self) {
        lock(&self.link).take();
        {
            let mut state = lock(&self.state);
            state.status = ConnectionStatus::Reconnecting;
            state.connection_id = None;
        }
        warn!("Sync hub connection lost");
        self.publish(ConnectionEvent::StatusChanged { connected: false });
    }

    /// Claim the next retry slot, or give up once the policy is exhausted
    fn next_retry_delay(&self) -> Option<(u32, Duration)> {
        let mut state = lock(&self.state);
        if self.policy.is_exhausted(state.reconnect_attempts) {
            let attempts = state.reconnect_attempts;
            state.status = ConnectionStatus::Disconnected;
            drop(state);
            warn!(attempts, "Giving up on sync hub; staying local-only");
            self.publish(ConnectionEvent::GaveUp { attempts });
            return None;
        }

        let attempt = state.reconnect_attempts;
        state.reconnect_attempts += 1;
        state.status = ConnectionStatus::Reconnecting;
        drop(state);
        let delay = self
            .policy
            .delay_for_attempt(attempt, &mut rand::thread_rng());
        Some((attempt, delay))
    }

    fn send(&self, invocation: Invocation) -> Result<(), SendError> {
        let target = invocation.target();
        if lock(&self.state).status != ConnectionStatus::Connected {
            debug!(target_name = target, "Not connected; skipping outbound event");
            return Err(SendError::NotConnected);
        }

        let frame = invocation
            .into_frame()
            .map_err(|source| SendError::Encode { target, source })?;
        let link = lock(&self.link);
        let Some(sender) = link.as_ref() else {
            return Err(SendError::NotConnected);
        };
        sender.send(frame).map_err(|_| {
            warn!(target_name = target, "Hub link closed during send");
            SendError::LinkClosed(target)
        })
    }

    fn publish(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
        if let ConnectionEvent::StatusChanged { connected } = event {
            self.router
                .dispatch(&Event::ConnectionStatusChanged { connected });
        }
    }
}

async fn supervise(
    inner: Arc<Inner>,
    token: String,
    mut inbound: Option<mpsc::UnboundedReceiver<HubFrame>>,
) {
    loop {
        if let Some(mut frames) = inbound.take() {
            while let Some(frame) = frames.recv().await {
                inner.router.dispatch_frame(&frame);
            }
            inner.on_link_lost();
        }

        let Some((attempt, delay)) = inner.next_retry_delay() else {
            return;
        };
        info!(attempt = attempt + 1, delay_ms = delay.as_millis(), "Scheduling hub reconnect");
        tokio::time::sleep(delay).await;

        match inner.transport.open(&token).await {
            Ok(link) => inbound = Some(inner.on_open(link)),
            Err(error) => warn!(attempt = attempt + 1, error = %error, "Hub reconnect failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::events::{EventKind, SyncType};
    use crate::transport::mock::MockTransport;
    use serde_json::json;

    fn manager(transport: Arc<MockTransport>) -> ConnectionManager {
        ConnectionManager::new(
            transport,
            EventRouter::new(),
            DeviceIdentity::new(DeviceId::new("device-a"), "user-1"),
            ReconnectPolicy::default(),
            Arc::new(ManualClock::new(1_000)),
        )
    }

    #[tokio::test]
    async fn missing_token_stays_disconnected_without_transport_attempt() {
        let transport = Arc::new(MockTransport::new());
        let connection = manager(transport.clone());

        connection.initialize(None).await;
        connection.initialize(Some("   ")).await;

        assert_eq!(connection.status(), ConnectionStatus::Disconnected);
        assert_eq!(transport.open_calls(), 0);
        assert!(matches!(
            connection.send_event(Invocation::RequestSync(SyncType::All)),
            Err(SendError::NotConnected)
        ));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn initialize_connects_and_registers_device() {
        let transport = Arc::new(MockTransport::new());
        let connection = manager(transport.clone());

        connection.initialize(Some("token")).await;

        let state = connection.state();
        assert_eq!(state.status, ConnectionStatus::Connected);
        assert_eq!(state.reconnect_attempts, 0);
        assert_eq!(state.last_connected_at, Some(1_000));
        assert!(state.connection_id.is_some());

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, "RegisterDevice");
        assert_eq!(sent[0].arguments["deviceId"], "device-a");

        connection
            .send_event(Invocation::RequestSync(SyncType::Alarms))
            .unwrap();
        assert_eq!(transport.sent_targets(), vec!["RequestSync".to_string()]);
        connection.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_drop_and_registers_again() {
        let transport = Arc::new(MockTransport::new());
        let connection = manager(transport.clone());
        let mut events = connection.subscribe();

        connection.initialize(Some("token")).await;
        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::StatusChanged { connected: true }
        );

        transport.drop_link();
        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::StatusChanged { connected: false }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::StatusChanged { connected: true }
        );

        let state = connection.state();
        assert_eq!(state.status, ConnectionStatus::Connected);
        assert_eq!(state.reconnect_attempts, 0);
        assert_eq!(transport.open_calls(), 2);
        assert_eq!(
            transport.sent_targets(),
            vec!["RegisterDevice".to_string(), "RegisterDevice".to_string()]
        );
        connection.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let transport = Arc::new(MockTransport::new());
        let connection = manager(transport.clone());
        let mut events = connection.subscribe();

        connection.initialize(Some("token")).await;
        transport.fail_opens(true);
        transport.drop_link();

        let gave_up = loop {
            match events.recv().await.unwrap() {
                ConnectionEvent::GaveUp { attempts } => break attempts,
                ConnectionEvent::StatusChanged { .. } => {}
            }
        };

        assert_eq!(gave_up, 5);
        // One initial open plus exactly `max_attempts` retries
        assert_eq!(transport.open_calls(), 6);
        assert_eq!(connection.status(), ConnectionStatus::Disconnected);

        // No further automatic retries
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        assert_eq!(transport.open_calls(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_initial_open_uses_retry_path() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_opens(true);
        let connection = manager(transport.clone());
        let mut events = connection.subscribe();

        connection.initialize(Some("token")).await;
        assert_eq!(connection.status(), ConnectionStatus::Reconnecting);

        transport.fail_opens(false);
        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::StatusChanged { connected: true }
        );
        assert_eq!(transport.open_calls(), 2);
        connection.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn retry_waits_at_least_the_base_delay() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_opens(true);
        let connection = manager(transport.clone());

        connection.initialize(Some("token")).await;
        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(transport.open_calls(), 1);
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        assert_eq!(transport.open_calls(), 2);
        connection.disconnect().await;
    }

    #[tokio::test]
    async fn inbound_frames_reach_router_listeners() {
        let transport = Arc::new(MockTransport::new());
        let connection = manager(transport.clone());
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        connection
            .router()
            .add_event_listener(EventKind::SystemNotification, move |event| {
                let _ = seen_tx.send(event.clone());
                Ok(())
            });

        connection.initialize(Some("token")).await;
        assert!(transport.push(HubFrame::new(
            "SystemNotification",
            json!({ "title": "Hi", "message": "there" })
        )));

        let event = seen_rx.recv().await.unwrap();
        assert_eq!(event.kind(), EventKind::SystemNotification);
        connection.disconnect().await;
    }

    #[tokio::test]
    async fn disconnect_resets_state_and_stops_sending() {
        let transport = Arc::new(MockTransport::new());
        let connection = manager(transport.clone());
        connection.initialize(Some("token")).await;

        connection.disconnect().await;

        let state = connection.state();
        assert_eq!(state.status, ConnectionStatus::Disconnected);
        assert_eq!(state.connection_id, None);
        assert!(connection
            .send_event(Invocation::RequestSync(SyncType::All))
            .is_err());
    }
}
