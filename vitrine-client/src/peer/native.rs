use crate::media::{MediaStream, RemoteTrack};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use vitrine_core::{IceCandidate, IceServerConfig, PeerConnectionRole, PeerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Connection state as reported by the WebRTC stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NativeEvent {
    /// Local trickle ICE candidate.
    IceCandidate(IceCandidate),
    /// Remote track arrived.
    Track(RemoteTrack),
    StateChange(NativeConnectionState),
}

/// Identifies one connection instance. `generation` changes whenever a
/// connection for the same peer and role is replaced.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionTag {
    pub peer_id: PeerId,
    pub role: PeerConnectionRole,
    pub generation: u64,
}

/// Where a native connection reports its callbacks.
#[derive(Debug, Clone)]
pub struct NativeEventSink {
    tag: ConnectionTag,
    tx: mpsc::UnboundedSender<(ConnectionTag, NativeEvent)>,
}

impl NativeEventSink {
    pub fn new(
        tag: ConnectionTag,
        tx: mpsc::UnboundedSender<(ConnectionTag, NativeEvent)>,
    ) -> Self {
        Self { tag, tx }
    }

    pub fn tag(&self) -> &ConnectionTag {
        &self.tag
    }

    /// Returns `false` once the owning manager is gone.
    pub fn emit(&self, event: NativeEvent) -> bool {
        self.tx.send((self.tag.clone(), event)).is_ok()
    }
}

/// One WebRTC peer connection.
#[async_trait]
pub trait NativePeerConnection: Send + Sync {
    async fn add_local_stream(&self, stream: &MediaStream) -> Result<()>;

    /// Creates an offer and applies it as the local description.
    async fn create_offer(&self, ice_restart: bool) -> Result<String>;

    /// Creates an answer and applies it as the local description.
    async fn create_answer(&self) -> Result<String>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        ice_servers: &[IceServerConfig],
        events: NativeEventSink,
    ) -> Result<Box<dyn NativePeerConnection>>;
}
