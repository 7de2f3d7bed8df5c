pub mod bus_bridge;

pub use bus_bridge::*;
pub use event_recorder::*;
pub use fake_network::*;
pub use local_connector::*;
