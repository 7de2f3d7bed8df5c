mod event_bus;
mod streaming_event;

pub use event_bus::*;
pub use streaming_event::*;
