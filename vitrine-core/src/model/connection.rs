use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a peer connection relative to the local client.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerConnectionRole {
    /// Local media goes out.
    Publish,
    /// Remote media comes in.
    Subscribe,
}

impl PeerConnectionRole {
    /// The role the remote end plays on the same connection.
    pub fn counterpart(self) -> Self {
        match self {
            Self::Publish => Self::Subscribe,
            Self::Subscribe => Self::Publish,
        }
    }
}

impl fmt::Display for PeerConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Publish => write!(f, "publish"),
            Self::Subscribe => write!(f, "subscribe"),
        }
    }
}

/// Lifecycle of a single peer connection.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Negotiating,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Failed | Self::Closed)
    }

    /// `failed` absorbs everything except disposal; `closed` absorbs everything.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (Closed, _) => false,
            (Failed, Closed) => true,
            (Failed, _) => false,
            (_, Failed) | (_, Closed) => true,
            (New, Negotiating) => true,
            (Negotiating, Connected) | (Negotiating, Disconnected) => true,
            (Connected, Disconnected) | (Connected, Negotiating) => true,
            (Disconnected, Connected) | (Disconnected, Negotiating) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Negotiating => "negotiating",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        write!(f, "{name}")
    }
}
