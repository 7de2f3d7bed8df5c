mod devices;
mod media_controller;
mod media_stream;

pub use devices::*;
pub use media_controller::*;
pub use media_stream::*;
