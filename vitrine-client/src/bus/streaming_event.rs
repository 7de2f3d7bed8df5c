use crate::media::RemoteStream;
use crate::signaling::SignalingState;
use std::fmt;
use vitrine_core::{ConnectionState, IceCandidate, PeerConnectionRole, PeerId, RoomId};

/// Name under which handlers subscribe. Every [`StreamingEvent`] variant maps
/// to exactly one kind.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum EventKind {
    SignalingStateChange,
    RoomJoined,
    PeerJoined,
    PeerLeft,
    OfferReceived,
    AnswerReceived,
    IceCandidateReceived,
    SignalingError,
    OfferCreated,
    AnswerCreated,
    IceCandidate,
    RemoteStream,
    ConnectionStateChange,
    PeerLost,
    WebRtcError,
}

impl EventKind {
    pub const ALL: [EventKind; 15] = [
        EventKind::SignalingStateChange,
        EventKind::RoomJoined,
        EventKind::PeerJoined,
        EventKind::PeerLeft,
        EventKind::OfferReceived,
        EventKind::AnswerReceived,
        EventKind::IceCandidateReceived,
        EventKind::SignalingError,
        EventKind::OfferCreated,
        EventKind::AnswerCreated,
        EventKind::IceCandidate,
        EventKind::RemoteStream,
        EventKind::ConnectionStateChange,
        EventKind::PeerLost,
        EventKind::WebRtcError,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::SignalingStateChange => "signalr:connection-state-change",
            Self::RoomJoined => "signalr:room-joined",
            Self::PeerJoined => "signalr:peer-joined",
            Self::PeerLeft => "signalr:peer-left",
            Self::OfferReceived => "signalr:offer-received",
            Self::AnswerReceived => "signalr:answer-received",
            Self::IceCandidateReceived => "signalr:ice-candidate-received",
            Self::SignalingError => "signalr:error",
            Self::OfferCreated => "webrtc:offer-created",
            Self::AnswerCreated => "webrtc:answer-created",
            Self::IceCandidate => "webrtc:ice-candidate",
            Self::RemoteStream => "webrtc:remote-stream",
            Self::ConnectionStateChange => "webrtc:connection-state-change",
            Self::PeerLost => "webrtc:peer-lost",
            Self::WebRtcError => "webrtc:error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything that travels over the [`EventBus`](crate::EventBus).
///
/// `signalr:*` variants are produced by the signaling client, `webrtc:*`
/// variants by the peer connection manager.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamingEvent {
    SignalingStateChange {
        state: SignalingState,
    },
    /// The relay acknowledged a join; `peers` are the other members.
    RoomJoined {
        room_id: RoomId,
        peers: Vec<PeerId>,
    },
    PeerJoined {
        peer_id: PeerId,
    },
    PeerLeft {
        peer_id: PeerId,
    },
    OfferReceived {
        peer_id: PeerId,
        sdp: String,
    },
    AnswerReceived {
        peer_id: PeerId,
        sdp: String,
    },
    /// `role` is the role of the connection that produced the candidate on
    /// the remote side.
    IceCandidateReceived {
        peer_id: PeerId,
        role: PeerConnectionRole,
        candidate: IceCandidate,
    },
    SignalingError {
        context: String,
        message: String,
    },
    OfferCreated {
        peer_id: PeerId,
        sdp: String,
        ice_restart: bool,
    },
    AnswerCreated {
        peer_id: PeerId,
        sdp: String,
    },
    IceCandidate {
        peer_id: PeerId,
        role: PeerConnectionRole,
        candidate: IceCandidate,
    },
    RemoteStream {
        peer_id: PeerId,
        stream: RemoteStream,
    },
    ConnectionStateChange {
        peer_id: PeerId,
        role: PeerConnectionRole,
        state: ConnectionState,
    },
    /// Every connection to the peer failed terminally.
    PeerLost {
        peer_id: PeerId,
    },
    WebRtcError {
        context: String,
        message: String,
        peer_id: Option<PeerId>,
    },
}

impl StreamingEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::SignalingStateChange { .. } => EventKind::SignalingStateChange,
            Self::RoomJoined { .. } => EventKind::RoomJoined,
            Self::PeerJoined { .. } => EventKind::PeerJoined,
            Self::PeerLeft { .. } => EventKind::PeerLeft,
            Self::OfferReceived { .. } => EventKind::OfferReceived,
            Self::AnswerReceived { .. } => EventKind::AnswerReceived,
            Self::IceCandidateReceived { .. } => EventKind::IceCandidateReceived,
            Self::SignalingError { .. } => EventKind::SignalingError,
            Self::OfferCreated { .. } => EventKind::OfferCreated,
            Self::AnswerCreated { .. } => EventKind::AnswerCreated,
            Self::IceCandidate { .. } => EventKind::IceCandidate,
            Self::RemoteStream { .. } => EventKind::RemoteStream,
            Self::ConnectionStateChange { .. } => EventKind::ConnectionStateChange,
            Self::PeerLost { .. } => EventKind::PeerLost,
            Self::WebRtcError { .. } => EventKind::WebRtcError,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }
}
