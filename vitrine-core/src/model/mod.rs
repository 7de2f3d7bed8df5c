mod candidate;
mod connection;
mod peer;
mod room;
mod signaling;

pub use candidate::{IceCandidate, parse_ice_candidate};
pub use connection::{ConnectionState, PeerConnectionRole};
pub use peer::PeerId;
pub use room::{InvalidRoomId, RoomId};
pub use signaling::{IceServerConfig, SignalMessage};
