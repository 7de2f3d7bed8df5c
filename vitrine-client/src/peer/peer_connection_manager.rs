use crate::bus::{EventBus, EventKind, StreamingEvent, Subscriptions};
use crate::error::{NegotiationError, StreamingError};
use crate::media::{MediaStream, RemoteStream, RemoteTrack};
use crate::peer::{
    ConnectionTag, NativeConnectionState, NativeEvent, NativeEventSink, NativePeerConnection,
    PeerConnectionFactory, SessionDescription,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vitrine_core::{ConnectionState, IceCandidate, IceServerConfig, PeerConnectionRole, PeerId};

type ConnectionKey = (PeerId, PeerConnectionRole);

enum Command {
    Event(StreamingEvent),
    Shutdown(oneshot::Sender<()>),
}

struct PeerConnection {
    native: Box<dyn NativePeerConnection>,
    generation: u64,
    state: ConnectionState,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
    tracks_attached: bool,
    restart_attempted: bool,
    /// Set while an ICE restart is in flight; the connection is given up
    /// when it passes.
    restart_deadline: Option<Instant>,
    renegotiated: bool,
    remote_stream: Option<RemoteStream>,
}

/// Handle to a running [`PeerConnectionManager`].
///
/// The manager keeps running until [`PeerConnectionHandle::close`] is called
/// or the handle is dropped.
pub struct PeerConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    subscriptions: Subscriptions,
    task: Option<JoinHandle<()>>,
}

impl PeerConnectionHandle {
    /// Stops listening to the bus, then closes every connection and waits
    /// for the manager to finish.
    pub async fn close(mut self) {
        self.subscriptions.unsubscribe_all();
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl Drop for PeerConnectionHandle {
    fn drop(&mut self) {
        self.subscriptions.unsubscribe_all();
    }
}

/// Owns the native peer connections of one room membership and drives
/// offer/answer/ICE exchange purely through bus events.
///
/// Connections are keyed by remote peer and role. Inputs from the bus and
/// from native callbacks are processed one at a time on a single task.
pub struct PeerConnectionManager {
    bus: EventBus,
    local_peer: PeerId,
    local_stream: Option<MediaStream>,
    ice_servers: Vec<IceServerConfig>,
    ice_restart_timeout: Duration,
    factory: Arc<dyn PeerConnectionFactory>,
    connections: HashMap<ConnectionKey, PeerConnection>,
    /// Candidates for connections that do not exist yet.
    early_candidates: HashMap<ConnectionKey, Vec<IceCandidate>>,
    next_generation: u64,
    command_rx: mpsc::UnboundedReceiver<Command>,
    native_rx: mpsc::UnboundedReceiver<(ConnectionTag, NativeEvent)>,
    native_tx: mpsc::UnboundedSender<(ConnectionTag, NativeEvent)>,
}

impl PeerConnectionManager {
    pub fn spawn(
        bus: EventBus,
        local_peer: PeerId,
        local_stream: Option<MediaStream>,
        ice_servers: Vec<IceServerConfig>,
        ice_restart_timeout: Duration,
        factory: Arc<dyn PeerConnectionFactory>,
    ) -> PeerConnectionHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (native_tx, native_rx) = mpsc::unbounded_channel();

        let mut subscriptions = Subscriptions::new();
        for kind in [
            EventKind::PeerJoined,
            EventKind::PeerLeft,
            EventKind::OfferReceived,
            EventKind::AnswerReceived,
            EventKind::IceCandidateReceived,
        ] {
            let tx = command_tx.clone();
            subscriptions.push(bus.on(kind, move |event| {
                let _ = tx.send(Command::Event(event.clone()));
            }));
        }

        let manager = Self {
            bus,
            local_peer,
            local_stream,
            ice_servers,
            ice_restart_timeout,
            factory,
            connections: HashMap::new(),
            early_candidates: HashMap::new(),
            next_generation: 1,
            command_rx,
            native_rx,
            native_tx,
        };
        let task = tokio::spawn(manager.run());

        PeerConnectionHandle {
            commands: command_tx,
            subscriptions,
            task: Some(task),
        }
    }

    async fn run(mut self) {
        info!("Peer connection manager started for {}", self.local_peer);

        loop {
            let restart_deadline = self.next_restart_deadline();
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(Command::Event(event)) => self.handle_event(event).await,
                        Some(Command::Shutdown(ack)) => {
                            self.close_all().await;
                            let _ = ack.send(());
                            break;
                        }
                        None => {
                            info!("Command channel closed. Closing connections.");
                            self.close_all().await;
                            break;
                        }
                    }
                }

                Some((tag, event)) = self.native_rx.recv() => {
                    self.handle_native_event(tag, event).await;
                }

                _ = tokio::time::sleep_until(restart_deadline.unwrap_or_else(Instant::now)), if restart_deadline.is_some() => {
                    self.expire_restarts().await;
                }
            }
        }

        info!("Peer connection manager finished");
    }

    async fn handle_event(&mut self, event: StreamingEvent) {
        match event {
            StreamingEvent::PeerJoined { peer_id } => self.on_peer_joined(peer_id).await,
            StreamingEvent::PeerLeft { peer_id } => self.on_peer_left(&peer_id).await,
            StreamingEvent::OfferReceived { peer_id, sdp } => {
                self.on_offer_received(peer_id, sdp).await
            }
            StreamingEvent::AnswerReceived { peer_id, sdp } => {
                self.on_answer_received(peer_id, sdp).await
            }
            StreamingEvent::IceCandidateReceived {
                peer_id,
                role,
                candidate,
            } => {
                // The sender's publish connection talks to our subscribe one
                // and vice versa.
                self.on_remote_candidate((peer_id, role.counterpart()), candidate)
                    .await
            }
            other => debug!("Ignoring {}", other.name()),
        }
    }

    async fn on_peer_joined(&mut self, peer_id: PeerId) {
        if peer_id == self.local_peer {
            return;
        }
        if self.has_connection_to(&peer_id) {
            debug!("Already connected to {}, not offering again", peer_id);
            return;
        }

        info!("Offering to {}", peer_id);
        let key = (peer_id.clone(), PeerConnectionRole::Publish);
        if !self.open(key.clone()).await {
            return;
        }
        self.attach_local_stream(&key).await;
        self.send_offer(&key, false).await;
    }

    async fn on_offer_received(&mut self, peer_id: PeerId, sdp: String) {
        if peer_id == self.local_peer {
            return;
        }

        let publish_key = (peer_id.clone(), PeerConnectionRole::Publish);
        if let Some(publish) = self.connections.get(&publish_key) {
            let negotiating = matches!(
                publish.state,
                ConnectionState::New | ConnectionState::Negotiating
            );
            if negotiating && self.local_peer > peer_id {
                info!("Glare with {}: keeping our offer", peer_id);
                self.early_candidates
                    .remove(&(peer_id, PeerConnectionRole::Subscribe));
                return;
            }
            if negotiating {
                info!("Glare with {}: yielding and answering", peer_id);
            } else {
                // An established peer only offers again after losing our side.
                info!("{} renegotiates from scratch, dropping our publish connection", peer_id);
            }
            self.close_connection(&publish_key).await;
        }

        let key = (peer_id.clone(), PeerConnectionRole::Subscribe);
        if !self.connections.contains_key(&key) && !self.open(key.clone()).await {
            return;
        }
        self.transition(&key, ConnectionState::Negotiating);

        let Some(conn) = self.connections.get(&key) else {
            return;
        };
        let applied = conn
            .native
            .set_remote_description(SessionDescription::offer(sdp))
            .await;
        if let Err(e) = applied {
            self.fail_negotiation(&key, "set-remote-offer", e).await;
            return;
        }
        self.remote_description_applied(&key).await;

        if !self.connections.contains_key(&publish_key) {
            self.attach_local_stream(&key).await;
        }

        let Some(conn) = self.connections.get(&key) else {
            return;
        };
        let answer = conn.native.create_answer().await;
        match answer {
            Ok(answer) => {
                debug!("Answering {}", peer_id);
                self.bus.emit(StreamingEvent::AnswerCreated { peer_id, sdp: answer });
            }
            Err(e) => self.fail_negotiation(&key, "create-answer", e).await,
        }
    }

    async fn on_answer_received(&mut self, peer_id: PeerId, sdp: String) {
        let key = (peer_id, PeerConnectionRole::Publish);
        let Some(conn) = self.connections.get(&key) else {
            debug!("Answer from {} matches no publish connection", key.0);
            return;
        };

        let applied = conn
            .native
            .set_remote_description(SessionDescription::answer(sdp))
            .await;
        match applied {
            Ok(()) => {
                // Whatever the peer trickled for an offer of its own is stale
                // once it answers ours.
                self.early_candidates
                    .remove(&(key.0.clone(), PeerConnectionRole::Subscribe));
                self.remote_description_applied(&key).await
            }
            Err(e) => {
                let retry = self
                    .connections
                    .get_mut(&key)
                    .is_some_and(|c| !std::mem::replace(&mut c.renegotiated, true));
                self.report(&key, "set-remote-answer", e.to_string());
                if retry {
                    info!("Renegotiating publish connection to {}", key.0);
                    self.send_offer(&key, false).await;
                } else {
                    self.terminate(&key).await;
                }
            }
        }
    }

    async fn on_remote_candidate(&mut self, key: ConnectionKey, candidate: IceCandidate) {
        let Some(conn) = self.connections.get_mut(&key) else {
            debug!("Holding candidate for {} ({}) until it exists", key.0, key.1);
            self.early_candidates.entry(key).or_default().push(candidate);
            return;
        };

        if !conn.remote_description_set {
            conn.pending_candidates.push(candidate);
            return;
        }

        let added = conn.native.add_ice_candidate(candidate).await;
        if let Err(e) = added {
            self.report(&key, "add-ice-candidate", e.to_string());
        }
    }

    async fn on_peer_left(&mut self, peer_id: &PeerId) {
        for role in [PeerConnectionRole::Publish, PeerConnectionRole::Subscribe] {
            let key = (peer_id.clone(), role);
            self.early_candidates.remove(&key);
            self.close_connection(&key).await;
        }
    }

    async fn handle_native_event(&mut self, tag: ConnectionTag, event: NativeEvent) {
        let key = (tag.peer_id.clone(), tag.role);
        if self
            .connections
            .get(&key)
            .is_none_or(|c| c.generation != tag.generation)
        {
            debug!("Ignoring event from replaced connection {:?}", tag);
            return;
        }

        match event {
            NativeEvent::IceCandidate(candidate) => {
                self.bus.emit(StreamingEvent::IceCandidate {
                    peer_id: tag.peer_id,
                    role: tag.role,
                    candidate,
                });
            }
            NativeEvent::Track(track) => self.on_remote_track(&key, track),
            NativeEvent::StateChange(state) => self.on_native_state(&key, state).await,
        }
    }

    fn on_remote_track(&mut self, key: &ConnectionKey, track: RemoteTrack) {
        let Some(conn) = self.connections.get_mut(key) else {
            return;
        };
        let changed = match conn.remote_stream.as_mut() {
            Some(stream) if stream.stream_id == track.stream_id => stream.merge(track),
            _ => {
                conn.remote_stream = Some(RemoteStream::from_track(track));
                true
            }
        };
        if !changed {
            return;
        }
        if let Some(stream) = conn.remote_stream.clone() {
            info!("Remote stream {} from {}", stream.stream_id, key.0);
            self.bus.emit(StreamingEvent::RemoteStream {
                peer_id: key.0.clone(),
                stream,
            });
        }
    }

    async fn on_native_state(&mut self, key: &ConnectionKey, state: NativeConnectionState) {
        match state {
            NativeConnectionState::New | NativeConnectionState::Closed => {}
            NativeConnectionState::Connecting => {
                self.transition(key, ConnectionState::Negotiating);
            }
            NativeConnectionState::Connected => {
                if let Some(conn) = self.connections.get_mut(key) {
                    conn.restart_attempted = false;
                    conn.restart_deadline = None;
                }
                self.transition(key, ConnectionState::Connected);
            }
            NativeConnectionState::Disconnected => {
                self.transition(key, ConnectionState::Disconnected);
            }
            NativeConnectionState::Failed => self.on_ice_failed(key).await,
        }
    }

    async fn on_ice_failed(&mut self, key: &ConnectionKey) {
        let first_failure = self
            .connections
            .get_mut(key)
            .is_some_and(|c| !std::mem::replace(&mut c.restart_attempted, true));

        if !first_failure {
            self.give_up(key).await;
            return;
        }

        warn!("Connection to {} ({}) failed, restarting ICE", key.0, key.1);
        self.transition(key, ConnectionState::Disconnected);
        self.transition(key, ConnectionState::Negotiating);
        let deadline = Instant::now() + self.ice_restart_timeout;
        if let Some(conn) = self.connections.get_mut(key) {
            conn.restart_deadline = Some(deadline);
        }
        // The answering side waits for the offerer's restart offer.
        if key.1 == PeerConnectionRole::Publish {
            self.send_offer(key, true).await;
        }
    }

    fn next_restart_deadline(&self) -> Option<Instant> {
        self.connections
            .values()
            .filter_map(|c| c.restart_deadline)
            .min()
    }

    async fn expire_restarts(&mut self) {
        let now = Instant::now();
        let expired: Vec<ConnectionKey> = self
            .connections
            .iter()
            .filter(|(_, c)| c.restart_deadline.is_some_and(|d| d <= now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            warn!(
                "ICE restart with {} ({}) did not complete within {:?}",
                key.0, key.1, self.ice_restart_timeout
            );
            self.give_up(&key).await;
        }
    }

    /// Reports the connection as failed for good and drops it.
    async fn give_up(&mut self, key: &ConnectionKey) {
        let failure = StreamingError::PeerConnectionFailure(key.0.clone());
        self.report(key, "peer-connection", failure.to_string());
        self.terminate(key).await;
    }

    /// Creates a connection for `key`, closing any previous one first.
    async fn open(&mut self, key: ConnectionKey) -> bool {
        if self.connections.contains_key(&key) {
            self.close_connection(&key).await;
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        let sink = NativeEventSink::new(
            ConnectionTag {
                peer_id: key.0.clone(),
                role: key.1,
                generation,
            },
            self.native_tx.clone(),
        );

        let native = match self.factory.create(&self.ice_servers, sink).await {
            Ok(native) => native,
            Err(e) => {
                self.report(&key, "create-connection", e.to_string());
                return false;
            }
        };

        let pending_candidates = self.early_candidates.remove(&key).unwrap_or_default();
        self.connections.insert(
            key,
            PeerConnection {
                native,
                generation,
                state: ConnectionState::New,
                remote_description_set: false,
                pending_candidates,
                tracks_attached: false,
                restart_attempted: false,
                restart_deadline: None,
                renegotiated: false,
                remote_stream: None,
            },
        );
        true
    }

    async fn attach_local_stream(&mut self, key: &ConnectionKey) {
        let Some(stream) = self.local_stream.clone() else {
            return;
        };
        let Some(conn) = self.connections.get_mut(key) else {
            return;
        };
        if conn.tracks_attached {
            return;
        }
        let attached = conn.native.add_local_stream(&stream).await;
        conn.tracks_attached = attached.is_ok();
        match attached {
            Ok(()) => {}
            Err(e) => self.report(key, "add-local-stream", e.to_string()),
        }
    }

    async fn send_offer(&mut self, key: &ConnectionKey, ice_restart: bool) {
        self.transition(key, ConnectionState::Negotiating);
        let Some(conn) = self.connections.get(key) else {
            return;
        };
        let offer = conn.native.create_offer(ice_restart).await;
        match offer {
            Ok(sdp) => self.bus.emit(StreamingEvent::OfferCreated {
                peer_id: key.0.clone(),
                sdp,
                ice_restart,
            }),
            Err(e) => self.fail_negotiation(key, "create-offer", e).await,
        }
    }

    async fn remote_description_applied(&mut self, key: &ConnectionKey) {
        let Some(conn) = self.connections.get_mut(key) else {
            return;
        };
        conn.remote_description_set = true;
        conn.restart_deadline = None;
        let pending = std::mem::take(&mut conn.pending_candidates);
        if !pending.is_empty() {
            debug!(
                "Applying {} buffered candidate(s) for {} ({})",
                pending.len(),
                key.0,
                key.1
            );
        }
        for candidate in pending {
            if let Err(e) = conn.native.add_ice_candidate(candidate).await {
                warn!("Buffered candidate rejected for {}: {}", key.0, e);
            }
        }
    }

    /// Applies a state change if the state machine allows it and publishes it.
    fn transition(&mut self, key: &ConnectionKey, next: ConnectionState) {
        let Some(conn) = self.connections.get_mut(key) else {
            return;
        };
        if conn.state == next || !conn.state.can_transition_to(next) {
            return;
        }
        debug!("{} ({}): {:?} -> {:?}", key.0, key.1, conn.state, next);
        conn.state = next;
        self.bus.emit(StreamingEvent::ConnectionStateChange {
            peer_id: key.0.clone(),
            role: key.1,
            state: next,
        });
    }

    async fn fail_negotiation(
        &mut self,
        key: &ConnectionKey,
        context: &'static str,
        e: anyhow::Error,
    ) {
        self.report(key, context, format!("{:#}", e));
        self.terminate(key).await;
    }

    /// Marks the connection failed, drops it, and reports the peer lost when
    /// nothing else connects us to it.
    async fn terminate(&mut self, key: &ConnectionKey) {
        self.transition(key, ConnectionState::Failed);
        if let Some(conn) = self.connections.remove(key) {
            let _ = conn.native.close().await;
        }
        for role in [PeerConnectionRole::Publish, PeerConnectionRole::Subscribe] {
            self.early_candidates.remove(&(key.0.clone(), role));
        }
        if !self.has_connection_to(&key.0) {
            warn!("Lost peer {}", key.0);
            self.bus.emit(StreamingEvent::PeerLost {
                peer_id: key.0.clone(),
            });
        }
    }

    async fn close_connection(&mut self, key: &ConnectionKey) {
        self.transition(key, ConnectionState::Closed);
        let Some(conn) = self.connections.remove(key) else {
            return;
        };
        debug!("Closing connection to {} ({})", key.0, key.1);
        if let Err(e) = conn.native.close().await {
            warn!("Failed to close connection to {}: {}", key.0, e);
        }
    }

    async fn close_all(&mut self) {
        let keys: Vec<ConnectionKey> = self.connections.keys().cloned().collect();
        for key in keys {
            self.close_connection(&key).await;
        }
        self.early_candidates.clear();
    }

    fn has_connection_to(&self, peer_id: &PeerId) -> bool {
        self.connections.keys().any(|(p, _)| p == peer_id)
    }

    fn report(&self, key: &ConnectionKey, context: &'static str, message: String) {
        let error = NegotiationError {
            peer_id: key.0.clone(),
            role: key.1,
            context,
            message,
        };
        warn!("{}", error);
        self.bus.emit(StreamingEvent::WebRtcError {
            context: context.to_owned(),
            message: error.to_string(),
            peer_id: Some(error.peer_id),
        });
    }
}
