use crate::hub::RelayHub;
use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};
use vitrine_core::PeerId;

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    access_token: Option<String>,
}

pub fn router(hub: RelayHub) -> Router {
    Router::new()
        .route("/ws/{peer_id}", get(ws_handler))
        .with_state(hub)
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(peer_id): Path<String>,
    Query(params): Query<ConnectParams>,
    State(hub): State<RelayHub>,
) -> impl IntoResponse {
    let peer_id = PeerId::from(peer_id);

    // Tokens are validated upstream; the relay only notes their absence.
    if params.access_token.as_deref().is_none_or(str::is_empty) {
        warn!("Peer {} connected without an access token", peer_id);
    }

    ws.on_upgrade(move |socket| handle_socket(socket, peer_id, hub))
}

async fn handle_socket(socket: WebSocket, peer_id: PeerId, hub: RelayHub) {
    info!("New WebSocket connection: {}", peer_id);

    let (mut sender, mut receiver) = socket.split();
    let (generation, mut rx) = hub.attach(&peer_id);

    let mut send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn({
        let hub = hub.clone();
        let peer_id = peer_id.clone();

        async move {
            while let Some(Ok(msg)) = receiver.next().await {
                match msg {
                    Message::Text(text) => hub.handle_text(&peer_id, text.as_str()),
                    Message::Close(_) => break,
                    other => debug!("Ignoring non-text frame from {}: {:?}", peer_id, other),
                }
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    hub.detach(&peer_id, generation);
    info!("WebSocket disconnected: {}", peer_id);
}
