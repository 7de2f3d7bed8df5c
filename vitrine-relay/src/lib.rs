mod hub;
mod signaling;

pub use hub::*;
pub use signaling::*;
