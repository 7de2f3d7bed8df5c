mod connector;
mod signaling_client;
mod signaling_state;
mod ws_connector;

pub use connector::*;
pub use signaling_client::*;
pub use signaling_state::*;
pub use ws_connector::*;
