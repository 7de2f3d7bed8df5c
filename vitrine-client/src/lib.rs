//! Real-time room streaming: media, signaling and peer negotiation wired
//! together through an event bus.
//!
//! [`RoomSessionManager`] is the entry point for applications.

mod bus;
mod config;
mod error;
mod media;
mod peer;
mod session;
mod signaling;

pub use bus::*;
pub use config::*;
pub use error::*;
pub use media::*;
pub use peer::*;
pub use session::*;
pub use signaling::*;

pub use vitrine_core::{
    ConnectionState, IceCandidate, IceServerConfig, PeerConnectionRole, PeerId, RoomId,
    SignalMessage,
};
