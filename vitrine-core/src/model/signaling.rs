use crate::model::connection::PeerConnectionRole;
use crate::model::peer::PeerId;
use crate::model::room::RoomId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }
}

/// Messages exchanged with the signaling relay.
///
/// `peer_id` on negotiation messages names the target when a client sends and
/// the origin when the relay delivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "op",
    content = "d",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum SignalMessage {
    Welcome {
        peer_id: PeerId,
    },
    JoinRoom {
        room: RoomId,
    },
    LeaveRoom {
        room: RoomId,
    },
    RoomJoined {
        room: RoomId,
        peers: Vec<PeerId>,
    },
    PeerJoined {
        peer_id: PeerId,
    },
    PeerLeft {
        peer_id: PeerId,
    },
    Offer {
        peer_id: PeerId,
        sdp: String,
    },
    Answer {
        peer_id: PeerId,
        sdp: String,
    },
    /// `candidate` stays untyped here; see `parse_ice_candidate`.
    IceCandidate {
        peer_id: PeerId,
        role: PeerConnectionRole,
        candidate: Value,
    },
    Error {
        message: String,
    },
}

impl SignalMessage {
    /// Same message addressed to a different peer. Used by the relay to turn
    /// a target into an origin.
    pub fn readdressed(self, peer: PeerId) -> Self {
        match self {
            Self::Offer { sdp, .. } => Self::Offer { peer_id: peer, sdp },
            Self::Answer { sdp, .. } => Self::Answer { peer_id: peer, sdp },
            Self::IceCandidate {
                role, candidate, ..
            } => Self::IceCandidate {
                peer_id: peer,
                role,
                candidate,
            },
            other => other,
        }
    }

    pub fn target(&self) -> Option<&PeerId> {
        match self {
            Self::Offer { peer_id, .. }
            | Self::Answer { peer_id, .. }
            | Self::IceCandidate { peer_id, .. } => Some(peer_id),
            _ => None,
        }
    }
}
