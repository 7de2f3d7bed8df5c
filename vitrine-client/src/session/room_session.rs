use crate::bus::StreamingEvent;
use crate::media::{MediaState, MediaStream, RemoteStream};
use crate::signaling::SignalingState;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use vitrine_core::{ConnectionState, PeerConnectionRole, PeerId, RoomId};

/// Aggregate state of one room membership.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
    Closed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingNegotiation {
    pub publish: bool,
    pub subscribe: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconnectStatus {
    pub attempt: u32,
    pub max_attempts: u32,
}

/// Snapshot of the session as observed by the UI.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RoomSession {
    pub room_id: Option<RoomId>,
    pub local_peer: PeerId,
    pub connection_state: SessionState,
    pub media_state: MediaState,
    pub local_stream: Option<MediaStream>,
    pub remote_streams: BTreeMap<PeerId, RemoteStream>,
    pub pending_negotiation: PendingNegotiation,
    pub reconnect: ReconnectStatus,
    pub signaling: SignalingState,
    pub last_error: Option<String>,
    known_peers: BTreeSet<PeerId>,
    connections: BTreeMap<(PeerId, PeerConnectionRole), ConnectionState>,
}

impl RoomSession {
    pub fn new(local_peer: PeerId) -> Self {
        Self {
            local_peer,
            ..Default::default()
        }
    }

    /// Fresh record for a new join of `room_id`; only the identity is kept.
    pub(crate) fn begin(&mut self, room_id: RoomId) {
        *self = Self {
            room_id: Some(room_id),
            local_peer: self.local_peer.clone(),
            ..Default::default()
        };
    }

    /// Other members of the room as last reported by the relay.
    pub fn known_peers(&self) -> impl Iterator<Item = &PeerId> {
        self.known_peers.iter()
    }

    pub fn connection_state_of(
        &self,
        peer_id: &PeerId,
        role: PeerConnectionRole,
    ) -> Option<ConnectionState> {
        self.connections.get(&(peer_id.clone(), role)).copied()
    }

    /// Folds one bus event into the record.
    pub(crate) fn apply(&mut self, event: &StreamingEvent) {
        match event {
            StreamingEvent::SignalingStateChange { state } => self.signaling = *state,
            StreamingEvent::RoomJoined { peers, .. } => {
                self.known_peers = peers.iter().cloned().collect();
                let resume = self.connection_state == SessionState::Reconnecting;
                let empty_room = self.connection_state == SessionState::Connecting
                    && self.known_peers.is_empty();
                if resume || empty_room {
                    self.connection_state = SessionState::Connected;
                }
                if resume {
                    self.reconnect.attempt = 0;
                }
            }
            StreamingEvent::PeerJoined { peer_id } => {
                self.known_peers.insert(peer_id.clone());
            }
            StreamingEvent::PeerLeft { peer_id } => {
                self.known_peers.remove(peer_id);
                self.forget_peer(peer_id);
            }
            StreamingEvent::PeerLost { peer_id } => self.forget_peer(peer_id),
            StreamingEvent::RemoteStream { peer_id, stream } => {
                self.remote_streams.insert(peer_id.clone(), stream.clone());
            }
            StreamingEvent::ConnectionStateChange {
                peer_id,
                role,
                state,
            } => {
                let key = (peer_id.clone(), *role);
                match state {
                    ConnectionState::Closed => {
                        self.connections.remove(&key);
                    }
                    _ => {
                        self.connections.insert(key, *state);
                    }
                }
                if *state == ConnectionState::Connected
                    && self.connection_state == SessionState::Connecting
                {
                    self.connection_state = SessionState::Connected;
                }
                self.refresh_pending();
            }
            StreamingEvent::SignalingError { context, message }
            | StreamingEvent::WebRtcError {
                context, message, ..
            } => {
                self.last_error = Some(format!("{}: {}", context, message));
            }
            _ => {}
        }
    }

    fn forget_peer(&mut self, peer_id: &PeerId) {
        self.remote_streams.remove(peer_id);
        self.connections.retain(|(p, _), _| p != peer_id);
        self.refresh_pending();
    }

    fn refresh_pending(&mut self) {
        let negotiating = |role: PeerConnectionRole| {
            self.connections
                .iter()
                .any(|((_, r), s)| *r == role && *s == ConnectionState::Negotiating)
        };
        self.pending_negotiation = PendingNegotiation {
            publish: negotiating(PeerConnectionRole::Publish),
            subscribe: negotiating(PeerConnectionRole::Subscribe),
        };
    }

    pub(crate) fn clear_peers(&mut self) {
        self.known_peers.clear();
        self.connections.clear();
        self.remote_streams.clear();
        self.pending_negotiation = PendingNegotiation::default();
    }
}
