//! Channel-driven environment signals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{EnvironmentSignals, Signal};
use crate::connection::ConnectionEvent;
use crate::util::lock;

const SIGNAL_CHANNEL_CAPACITY: usize = 64;

/// Signals fed by the embedding interface through [`ChannelSignals::emit`]
#[derive(Debug)]
pub struct ChannelSignals {
    sender: broadcast::Sender<Signal>,
    online: AtomicBool,
    background_sync: bool,
    registered: Mutex<Vec<String>>,
}

impl ChannelSignals {
    pub fn new(online: bool) -> Self {
        let (sender, _) = broadcast::channel(SIGNAL_CHANNEL_CAPACITY);
        Self {
            sender,
            online: AtomicBool::new(online),
            background_sync: false,
            registered: Mutex::new(Vec::new()),
        }
    }

    /// Accept background sync registrations
    #[must_use]
    pub const fn with_background_sync(mut self) -> Self {
        self.background_sync = true;
        self
    }

    pub fn emit(&self, signal: Signal) {
        if let Signal::Connectivity(online) = signal {
            self.online.store(online, Ordering::SeqCst);
        }
        let _ = self.sender.send(signal);
    }

    /// Fire every pending background sync registration
    pub fn fire_background_sync(&self) -> usize {
        let tags: Vec<String> = lock(&self.registered).drain(..).collect();
        for tag in &tags {
            let _ = self.sender.send(Signal::BackgroundSync(tag.clone()));
        }
        tags.len()
    }

    pub fn registered_tags(&self) -> Vec<String> {
        lock(&self.registered).clone()
    }
}

impl Default for ChannelSignals {
    fn default() -> Self {
        Self::new(true)
    }
}

impl EnvironmentSignals for ChannelSignals {
    fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.sender.subscribe()
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn register_background_sync(&self, tag: &str) -> bool {
        if !self.background_sync {
            return false;
        }
        let mut registered = lock(&self.registered);
        if !registered.iter().any(|existing| existing == tag) {
            registered.push(tag.to_string());
        }
        true
    }
}

/// Mirror hub connection status into connectivity signals.
///
/// Used where the platform has no network signal of its own.
pub fn bridge_connectivity(
    signals: Arc<ChannelSignals>,
    mut events: broadcast::Receiver<ConnectionEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ConnectionEvent::StatusChanged { connected }) => {
                    signals.emit(Signal::Connectivity(connected));
                }
                Ok(ConnectionEvent::GaveUp { .. }) => {
                    signals.emit(Signal::Connectivity(false));
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Connectivity bridge lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
