//! WebSocket hub transport.
//!
//! Frames travel as JSON text messages `{"target": ..., "arguments": ...}`.
//! The auth token is sent as a bearer `Authorization` header on the upgrade.
//! `wss://` hubs are reached over rustls with the webpki root set.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use super::{Transport, TransportError, TransportLink};
use crate::events::HubFrame;
use crate::util::{compact_text, normalize_text_option};

#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Result<Self, TransportError> {
        let url = normalize_text_option(Some(url.into()))
            .ok_or_else(|| TransportError::InvalidUrl("hub URL must not be empty".to_string()))?;
        if url.starts_with("ws://") || url.starts_with("wss://") {
            Ok(Self { url })
        } else {
            Err(TransportError::InvalidUrl(format!(
                "{url} must include ws:// or wss://"
            )))
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, auth_token: &str) -> Result<TransportLink, TransportError> {
        install_crypto_provider();
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|error| TransportError::InvalidUrl(error.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {auth_token}"))
            .map_err(|_| TransportError::Unauthorized("token is not a valid header".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, _) = connect_async(request).await.map_err(map_connect_error)?;
        info!(url = %self.url, "Hub WebSocket connected");

        let (mut sink, mut source) = stream.split();
        let (link, mut outbound_rx, inbound_tx) = TransportLink::pair();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = outbound_rx.recv() => {
                        let Some(frame) = frame else {
                            let _ = sink.close().await;
                            break;
                        };
                        match serde_json::to_string(&frame) {
                            Ok(text) => {
                                if let Err(error) = sink.send(Message::Text(text)).await {
                                    warn!(error = %error, "Hub WebSocket send failed");
                                    break;
                                }
                            }
                            Err(error) => warn!(target_name = %frame.target, error = %error, "Failed to encode hub frame"),
                        }
                    }
                    message = source.next() => {
                        match message {
                            Some(Ok(Message::Text(text))) => match serde_json::from_str::<HubFrame>(&text) {
                                Ok(frame) => {
                                    if inbound_tx.send(frame).is_err() {
                                        break;
                                    }
                                }
                                Err(error) => {
                                    warn!(error = %error, payload = %compact_text(&text), "Ignoring non-frame hub message");
                                }
                            },
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Err(error)) => {
                                warn!(error = %error, "Hub WebSocket error");
                                break;
                            }
                            Some(Ok(_)) => {}
                        }
                    }
                }
            }
            debug!("Hub WebSocket pump stopped");
        });

        Ok(link)
    }
}

/// Pin rustls to ring; a no-op once a process-wide provider is installed
fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

fn map_connect_error(error: WsError) -> TransportError {
    match error {
        WsError::Http(response)
            if matches!(
                response.status(),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
            ) =>
        {
            TransportError::Unauthorized(format!("HTTP {}", response.status().as_u16()))
        }
        WsError::Url(url_error) => TransportError::InvalidUrl(url_error.to_string()),
        other => TransportError::Connect(other.to_string()),
    }
}
