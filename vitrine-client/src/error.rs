use std::time::Duration;
use thiserror::Error;
use vitrine_core::{PeerConnectionRole, PeerId};

/// Camera/microphone could not be acquired. Fatal for the join attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaAccessError {
    #[error("permission to use camera or microphone was denied")]
    PermissionDenied,
    #[error("no camera or microphone available")]
    NoDevice,
    #[error("media device error: {0}")]
    Device(String),
}

/// The signaling transport is down or could not be established.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignalingTransportError {
    #[error("failed to connect to signaling relay: {0}")]
    Connect(String),
    #[error("not connected to signaling relay")]
    NotConnected,
    #[error("failed to encode signal message: {0}")]
    Encode(String),
}

/// SDP or candidate handling failed on one connection.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{context} failed for {peer_id} ({role}): {message}")]
pub struct NegotiationError {
    pub peer_id: PeerId,
    pub role: PeerConnectionRole,
    pub context: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors surfaced to application code.
#[derive(Debug, Error)]
pub enum StreamingError {
    #[error(transparent)]
    MediaAccess(#[from] MediaAccessError),
    #[error(transparent)]
    SignalingTransport(#[from] SignalingTransportError),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error("connection to peer {0} failed and an ICE restart did not recover it")]
    PeerConnectionFailure(PeerId),
    #[error("no peer connected within {0:?}")]
    JoinTimeout(Duration),
    #[error("join cancelled by leave_room")]
    Cancelled,
    #[error("session failed: {0}")]
    SessionFailed(String),
    #[error("not in a room")]
    NotInRoom,
    #[error(transparent)]
    Config(#[from] ConfigError),
}
