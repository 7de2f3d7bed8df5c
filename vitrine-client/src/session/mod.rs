mod backoff;
mod room_session;
mod room_session_manager;
mod session_supervisor;

pub use backoff::*;
pub use room_session::*;
pub use room_session_manager::*;
