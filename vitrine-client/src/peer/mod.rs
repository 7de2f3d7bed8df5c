mod native;
mod peer_connection_manager;
mod webrtc_connection;

pub use native::*;
pub use peer_connection_manager::*;
pub use webrtc_connection::*;
