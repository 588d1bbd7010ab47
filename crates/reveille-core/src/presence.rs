//! Presence announcements: a periodic "active" heartbeat plus immediate
//! updates on visibility and focus changes. Every announcement is
//! best-effort; failures are logged and never retried.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::clock::Clock;
use crate::connection::ConnectionManager;
use crate::events::{Invocation, PresenceEvent, PresenceStatus};
use crate::services::{EnvironmentSignals, Signal, Visibility};
use crate::util::lock;

#[derive(Clone)]
pub struct PresenceTracker {
    inner: Arc<Inner>,
}

struct Inner {
    connection: ConnectionManager,
    signals: Arc<dyn EnvironmentSignals>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceTracker {
    pub fn new(
        connection: ConnectionManager,
        signals: Arc<dyn EnvironmentSignals>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                connection,
                signals,
                clock,
                interval,
                task: Mutex::new(None),
            }),
        }
    }

    /// Start the heartbeat and signal listener. Restarts if already running.
    pub fn start(&self) {
        let mut signals = self.inner.signals.subscribe();
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(inner.interval);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut signals_open = true;
            loop {
                tokio::select! {
                    _ = heartbeat.tick() => {
                        inner.announce(PresenceStatus::Active);
                    }
                    signal = signals.recv(), if signals_open => match signal {
                        Ok(signal) => {
                            if let Some(status) = status_for(&signal) {
                                inner.announce(status);
                            }
                        }
                        Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => signals_open = false,
                    },
                }
            }
        });

        if let Some(previous) = lock(&self.inner.task).replace(task) {
            previous.abort();
        }
    }

    /// Announce `status` now. Returns whether the hub accepted it.
    pub fn announce(&self, status: PresenceStatus) -> bool {
        self.inner.announce(status)
    }

    /// Cancel the heartbeat and announce `offline` once
    pub fn stop(&self) {
        if let Some(task) = lock(&self.inner.task).take() {
            task.abort();
        }
        self.inner.announce(PresenceStatus::Offline);
    }
}

impl Inner {
    fn announce(&self, status: PresenceStatus) -> bool {
        let identity = self.connection.identity();
        let presence = PresenceEvent {
            user_id: identity.user_id.clone(),
            device_id: identity.device_id.clone(),
            status,
            timestamp: self.clock.now_millis(),
        };
        match self
            .connection
            .send_event(Invocation::UpdatePresence(presence))
        {
            Ok(()) => true,
            Err(error) => {
                debug!(?status, error = %error, "Presence update not sent");
                false
            }
        }
    }
}

const fn status_for(signal: &Signal) -> Option<PresenceStatus> {
    match signal {
        Signal::Visibility(Visibility::Visible) | Signal::Focus(true) => {
            Some(PresenceStatus::Active)
        }
        Signal::Visibility(Visibility::Hidden) => Some(PresenceStatus::Away),
        Signal::Focus(false) => Some(PresenceStatus::Idle),
        Signal::Connectivity(_) | Signal::BackgroundSync(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ReconnectPolicy;
    use crate::connection::DeviceIdentity;
    use crate::models::DeviceId;
    use crate::router::EventRouter;
    use crate::services::ChannelSignals;
    use crate::transport::mock::MockTransport;
    use crate::events::HubFrame;

    async fn connected() -> (ConnectionManager, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let connection = ConnectionManager::new(
            transport.clone(),
            EventRouter::new(),
            DeviceIdentity::new(DeviceId::new("device-a"), "user-1"),
            ReconnectPolicy::default(),
            Arc::new(ManualClock::new(0)),
        );
        connection.initialize(Some("token")).await;
        // Drop the registration frame
        transport.sent();
        (connection, transport)
    }

    fn statuses(frames: &[HubFrame]) -> Vec<String> {
        frames
            .iter()
            .filter(|frame| frame.target == "UpdatePresence")
            .map(|frame| frame.arguments["status"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_announces_active_on_interval() {
        let (connection, transport) = connected().await;
        let signals = Arc::new(ChannelSignals::new(true));
        let tracker = PresenceTracker::new(
            connection.clone(),
            signals,
            Arc::new(ManualClock::new(0)),
            Duration::from_secs(30),
        );

        tracker.start();
        // First tick fires immediately, then at 30s and 60s
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(statuses(&transport.sent()), vec!["active", "active", "active"]);
        tracker.stop();
        connection.disconnect().await;
    }

    #[tokio::test(start_paused = true)]
    async fn visibility_and_focus_map_to_statuses() {
        let (connection, transport) = connected().await;
        let signals = Arc::new(ChannelSignals::new(true));
        let tracker = PresenceTracker::new(
            connection.clone(),
            signals.clone(),
            Arc::new(ManualClock::new(0)),
            Duration::from_secs(30),
        );
        tracker.start();
        tokio::time::sleep(Duration::from_millis(10)).await;
        transport.sent();

        for signal in [
            Signal::Visibility(Visibility::Hidden),
            Signal::Focus(false),
            Signal::Focus(true),
            Signal::Connectivity(true),
        ] {
            signals.emit(signal);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(statuses(&transport.sent()), vec!["away", "idle", "active"]);

        tracker.stop();
        assert_eq!(statuses(&transport.sent()), vec!["offline"]);
        connection.disconnect().await;
    }

    #[tokio::test]
    async fn announce_failure_is_swallowed() {
        let transport = Arc::new(MockTransport::new());
        let connection = ConnectionManager::new(
            transport,
            EventRouter::new(),
            DeviceIdentity::new(DeviceId::new("device-a"), "user-1"),
            ReconnectPolicy::default(),
            Arc::new(ManualClock::new(0)),
        );
        let tracker = PresenceTracker::new(
            connection,
            Arc::new(ChannelSignals::new(false)),
            Arc::new(ManualClock::new(0)),
            Duration::from_secs(30),
        );

        assert!(!tracker.announce(PresenceStatus::Active));
        tracker.stop();
    }
}
