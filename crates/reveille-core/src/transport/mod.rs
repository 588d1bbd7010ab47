//! Bidirectional hub transport.
//!
//! A [`Transport`] opens a [`TransportLink`]: a pair of channels carrying
//! [`HubFrame`]s. The link is closed once the inbound channel ends; dropping
//! the outbound sender asks the transport to close its side.

#[cfg(test)]
pub(crate) mod mock;
mod websocket;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::events::HubFrame;

pub use websocket::WebSocketTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid hub URL: {0}")]
    InvalidUrl(String),
    #[error("Hub rejected credentials: {0}")]
    Unauthorized(String),
    #[error("Hub connection failed: {0}")]
    Connect(String),
}

/// An open connection to the hub
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<HubFrame>,
    pub inbound: mpsc::UnboundedReceiver<HubFrame>,
}

impl TransportLink {
    /// Create a link plus the peer ends of both channels
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<HubFrame>, mpsc::UnboundedSender<HubFrame>) {
        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        (Self { outbound, inbound }, from_client, to_client)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, auth_token: &str) -> Result<TransportLink, TransportError>;
}
