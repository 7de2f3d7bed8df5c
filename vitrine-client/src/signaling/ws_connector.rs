use crate::error::SignalingTransportError;
use crate::signaling::{SignalingConnector, SignalingLink};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;
use vitrine_core::PeerId;

/// Connects to a relay over WebSocket at `{base_url}/ws/{peer_id}`.
pub struct WebSocketConnector {
    base_url: String,
}

impl WebSocketConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// Relay endpoint for `peer_id`. `http(s)` bases are mapped to `ws(s)`.
    pub fn endpoint(
        &self,
        peer_id: &PeerId,
        credential: &str,
    ) -> Result<Url, SignalingTransportError> {
        let invalid = |reason: String| {
            SignalingTransportError::Connect(format!("relay url '{}': {}", self.base_url, reason))
        };

        let mut url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        let scheme = match url.scheme() {
            "ws" | "http" => "ws",
            "wss" | "https" => "wss",
            other => return Err(invalid(format!("unsupported scheme '{other}'"))),
        };
        url.set_scheme(scheme)
            .map_err(|_| invalid(format!("cannot switch to '{scheme}'")))?;

        url.path_segments_mut()
            .map_err(|_| invalid("cannot be a base".to_owned()))?
            .pop_if_empty()
            .push("ws")
            .push(peer_id.as_str());
        url.query_pairs_mut().append_pair("access_token", credential);
        Ok(url)
    }
}

#[async_trait]
impl SignalingConnector for WebSocketConnector {
    async fn connect(
        &self,
        peer_id: &PeerId,
        credential: &str,
    ) -> Result<SignalingLink, SignalingTransportError> {
        let url = self.endpoint(peer_id, credential)?;
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| SignalingTransportError::Connect(e.to_string()))?;
        info!("WebSocket connected to signaling relay as {}", peer_id);

        let (mut sender, mut receiver) = ws_stream.split();
        let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(text) = outgoing_rx.recv().await {
                if let Err(e) = sender.send(Message::text(text)).await {
                    warn!("WebSocket send failed: {}", e);
                    return;
                }
            }
            debug!("Signaling link dropped locally, closing WebSocket");
            let _ = sender.send(Message::Close(None)).await;
        });

        tokio::spawn(async move {
            while let Some(frame) = receiver.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if incoming_tx.send(text.as_str().to_owned()).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        info!("WebSocket closed by relay");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("WebSocket receive failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(SignalingLink {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
        })
    }
}
