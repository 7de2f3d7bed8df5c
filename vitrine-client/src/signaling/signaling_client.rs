use crate::bus::{EventBus, EventKind, StreamingEvent, Subscriptions};
use crate::error::SignalingTransportError;
use crate::signaling::{SignalingConnector, SignalingState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vitrine_core::{PeerId, RoomId, SignalMessage, parse_ice_candidate};

struct ActiveLink {
    generation: u64,
    outgoing: mpsc::UnboundedSender<String>,
    reader: JoinHandle<()>,
}

/// Link shared between the client, its reader task and the outbound bus
/// handlers. A link is identified by its generation so a reader that outlived
/// its link cannot tear down a newer one.
struct LinkSlot {
    link: Mutex<Option<ActiveLink>>,
    next_generation: AtomicU64,
}

impl LinkSlot {
    fn lock(&self) -> MutexGuard<'_, Option<ActiveLink>> {
        match self.link.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn send(&self, message: &SignalMessage) -> Result<(), SignalingTransportError> {
        let text = serde_json::to_string(message)
            .map_err(|e| SignalingTransportError::Encode(e.to_string()))?;
        let guard = self.lock();
        let link = guard.as_ref().ok_or(SignalingTransportError::NotConnected)?;
        link.outgoing
            .send(text)
            .map_err(|_| SignalingTransportError::NotConnected)
    }

    fn is_connected(&self) -> bool {
        self.lock()
            .as_ref()
            .is_some_and(|link| !link.outgoing.is_closed())
    }

    /// Clears the slot if it still holds `generation`.
    fn release(&self, generation: u64) -> bool {
        let mut guard = self.lock();
        if guard.as_ref().is_some_and(|l| l.generation == generation) {
            *guard = None;
            true
        } else {
            false
        }
    }
}

/// Keeps the connection to the signaling relay and translates between wire
/// messages and bus events.
///
/// Inbound messages are republished as `signalr:*` events. Outbound
/// negotiation (`webrtc:offer-created`, `webrtc:answer-created`,
/// `webrtc:ice-candidate`) is picked up from the bus and sent to the relay.
pub struct SignalingClient {
    bus: EventBus,
    connector: Arc<dyn SignalingConnector>,
    local_peer: PeerId,
    credential: String,
    slot: Arc<LinkSlot>,
    subscriptions: Mutex<Subscriptions>,
}

impl SignalingClient {
    pub fn new(
        bus: EventBus,
        connector: Arc<dyn SignalingConnector>,
        local_peer: PeerId,
        credential: impl Into<String>,
    ) -> Self {
        let slot = Arc::new(LinkSlot {
            link: Mutex::new(None),
            next_generation: AtomicU64::new(1),
        });

        let mut subscriptions = Subscriptions::new();
        for kind in [
            EventKind::OfferCreated,
            EventKind::AnswerCreated,
            EventKind::IceCandidate,
        ] {
            let slot = slot.clone();
            let handler_bus = bus.clone();
            subscriptions.push(bus.on(kind, move |event| {
                forward_outbound(&slot, &handler_bus, event);
            }));
        }

        Self {
            bus,
            connector,
            local_peer,
            credential: credential.into(),
            slot,
            subscriptions: Mutex::new(subscriptions),
        }
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    pub fn is_connected(&self) -> bool {
        self.slot.is_connected()
    }

    /// Opens the transport. A no-op while already connected.
    pub async fn connect(&self) -> Result<(), SignalingTransportError> {
        if self.is_connected() {
            return Ok(());
        }
        self.publish_state(SignalingState::Connecting);

        let link = match self
            .connector
            .connect(&self.local_peer, &self.credential)
            .await
        {
            Ok(link) => link,
            Err(e) => {
                warn!("Signaling connect failed: {}", e);
                self.bus.emit(StreamingEvent::SignalingError {
                    context: "connect".into(),
                    message: e.to_string(),
                });
                self.publish_state(SignalingState::Failed);
                return Err(e);
            }
        };

        let generation = self.slot.next_generation.fetch_add(1, Ordering::Relaxed);
        // The reader starts only after `connected` is published and the link
        // is stored, so inbound traffic never precedes the state change.
        let (start_tx, start_rx) = oneshot::channel();
        let reader = tokio::spawn(read_loop(
            self.slot.clone(),
            self.bus.clone(),
            self.local_peer.clone(),
            generation,
            start_rx,
            link.incoming,
        ));
        let previous = self.slot.lock().replace(ActiveLink {
            generation,
            outgoing: link.outgoing,
            reader,
        });
        if let Some(previous) = previous {
            previous.reader.abort();
        }

        info!("Signaling connected as {}", self.local_peer);
        self.publish_state(SignalingState::Connected);
        let _ = start_tx.send(());
        Ok(())
    }

    /// Closes the transport on purpose. No `signalr:error` is published.
    pub fn disconnect(&self) {
        let Some(link) = self.slot.lock().take() else {
            return;
        };
        link.reader.abort();
        drop(link.outgoing);
        info!("Signaling disconnected");
        self.publish_state(SignalingState::Disconnected);
    }

    pub fn join_room(&self, room: &RoomId) -> Result<(), SignalingTransportError> {
        debug!("Sending join-room {}", room);
        self.slot.send(&SignalMessage::JoinRoom { room: room.clone() })
    }

    pub fn leave_room(&self, room: &RoomId) -> Result<(), SignalingTransportError> {
        debug!("Sending leave-room {}", room);
        self.slot.send(&SignalMessage::LeaveRoom { room: room.clone() })
    }

    /// Drops the outbound bus handlers and the transport.
    pub fn shutdown(&self) {
        match self.subscriptions.lock() {
            Ok(mut subs) => subs.unsubscribe_all(),
            Err(poisoned) => poisoned.into_inner().unsubscribe_all(),
        }
        self.disconnect();
    }

    fn publish_state(&self, state: SignalingState) {
        self.bus.emit(StreamingEvent::SignalingStateChange { state });
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn forward_outbound(slot: &LinkSlot, bus: &EventBus, event: &StreamingEvent) {
    let message = match event {
        StreamingEvent::OfferCreated { peer_id, sdp, .. } => SignalMessage::Offer {
            peer_id: peer_id.clone(),
            sdp: sdp.clone(),
        },
        StreamingEvent::AnswerCreated { peer_id, sdp } => SignalMessage::Answer {
            peer_id: peer_id.clone(),
            sdp: sdp.clone(),
        },
        StreamingEvent::IceCandidate {
            peer_id,
            role,
            candidate,
        } => {
            let candidate = match serde_json::to_value(candidate) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Failed to encode local ICE candidate: {}", e);
                    return;
                }
            };
            SignalMessage::IceCandidate {
                peer_id: peer_id.clone(),
                role: *role,
                candidate,
            }
        }
        _ => return,
    };

    if let Err(e) = slot.send(&message) {
        warn!("Dropping outbound {}: {}", event.name(), e);
        bus.emit(StreamingEvent::SignalingError {
            context: "send".into(),
            message: e.to_string(),
        });
    }
}

async fn read_loop(
    slot: Arc<LinkSlot>,
    bus: EventBus,
    local_peer: PeerId,
    generation: u64,
    start: oneshot::Receiver<()>,
    mut incoming: mpsc::UnboundedReceiver<String>,
) {
    if start.await.is_err() {
        return;
    }
    while let Some(text) = incoming.recv().await {
        match serde_json::from_str::<SignalMessage>(&text) {
            Ok(message) => dispatch_inbound(&bus, &local_peer, message),
            Err(e) => warn!("Ignoring malformed signal message: {}", e),
        }
    }

    if slot.release(generation) {
        warn!("Signaling transport lost");
        bus.emit(StreamingEvent::SignalingError {
            context: "transport".into(),
            message: "connection to signaling relay lost".into(),
        });
        bus.emit(StreamingEvent::SignalingStateChange {
            state: SignalingState::Disconnected,
        });
    }
}

fn dispatch_inbound(bus: &EventBus, local_peer: &PeerId, message: SignalMessage) {
    match message {
        SignalMessage::Welcome { peer_id } => {
            if &peer_id != local_peer {
                warn!("Relay welcomed {} but we are {}", peer_id, local_peer);
            } else {
                debug!("Relay welcomed {}", peer_id);
            }
        }
        SignalMessage::RoomJoined { room, peers } => {
            let peers: Vec<PeerId> = peers.into_iter().filter(|p| p != local_peer).collect();
            info!("Joined room {} with {} peer(s)", room, peers.len());
            bus.emit(StreamingEvent::RoomJoined {
                room_id: room,
                peers: peers.clone(),
            });
            for peer_id in peers {
                bus.emit(StreamingEvent::PeerJoined { peer_id });
            }
        }
        SignalMessage::PeerJoined { peer_id } => {
            if &peer_id != local_peer {
                info!("Peer {} joined", peer_id);
                bus.emit(StreamingEvent::PeerJoined { peer_id });
            }
        }
        SignalMessage::PeerLeft { peer_id } => {
            info!("Peer {} left", peer_id);
            bus.emit(StreamingEvent::PeerLeft { peer_id });
        }
        SignalMessage::Offer { peer_id, sdp } => {
            debug!("Received Offer from {}", peer_id);
            bus.emit(StreamingEvent::OfferReceived { peer_id, sdp });
        }
        SignalMessage::Answer { peer_id, sdp } => {
            debug!("Received Answer from {}", peer_id);
            bus.emit(StreamingEvent::AnswerReceived { peer_id, sdp });
        }
        SignalMessage::IceCandidate {
            peer_id,
            role,
            candidate,
        } => match parse_ice_candidate(&candidate) {
            Some(candidate) => bus.emit(StreamingEvent::IceCandidateReceived {
                peer_id,
                role,
                candidate,
            }),
            None => warn!("Dropping malformed ICE candidate from {}: {}", peer_id, candidate),
        },
        SignalMessage::Error { message } => {
            warn!("Relay reported an error: {}", message);
            bus.emit(StreamingEvent::SignalingError {
                context: "relay".into(),
                message,
            });
        }
        SignalMessage::JoinRoom { .. } | SignalMessage::LeaveRoom { .. } => {
            warn!("Ignoring client-only message from relay");
        }
    }
}
