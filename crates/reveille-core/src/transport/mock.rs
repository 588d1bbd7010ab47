//! In-process transport for tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Transport, TransportError, TransportLink};
use crate::events::HubFrame;
use crate::util::lock;

struct Peer {
    from_client: mpsc::UnboundedReceiver<HubFrame>,
    to_client: Option<mpsc::UnboundedSender<HubFrame>>,
}

#[derive(Default)]
pub struct MockTransport {
    open_calls: AtomicU32,
    fail_opens: AtomicBool,
    peers: Mutex<Vec<Peer>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_calls(&self) -> u32 {
        self.open_calls.load(Ordering::SeqCst)
    }

    /// Make every following `open` fail
    pub fn fail_opens(&self, fail: bool) {
        self.fail_opens.store(fail, Ordering::SeqCst);
    }

    /// Close the most recent link from the hub side
    pub fn drop_link(&self) {
        if let Some(peer) = lock(&self.peers).last_mut() {
            peer.to_client = None;
        }
    }

    /// Deliver a frame on the most recent link
    pub fn push(&self, frame: HubFrame) -> bool {
        lock(&self.peers)
            .last()
            .and_then(|peer| peer.to_client.as_ref())
            .is_some_and(|sender| sender.send(frame).is_ok())
    }

    /// Drain every frame the client has sent so far, across all links
    pub fn sent(&self) -> Vec<HubFrame> {
        let mut frames = Vec::new();
        for peer in lock(&self.peers).iter_mut() {
            while let Ok(frame) = peer.from_client.try_recv() {
                frames.push(frame);
            }
        }
        frames
    }

    pub fn sent_targets(&self) -> Vec<String> {
        self.sent().into_iter().map(|frame| frame.target).collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, _auth_token: &str) -> Result<TransportLink, TransportError> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_opens.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("mock refused".to_string()));
        }
        let (link, from_client, to_client) = TransportLink::pair();
        lock(&self.peers).push(Peer {
            from_client,
            to_client: Some(to_client),
        });
        Ok(link)
    }
}
