use std::fmt;

/// Transport lifecycle of the signaling link.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Default)]
pub enum SignalingState {
    Connecting,
    Connected,
    #[default]
    Disconnected,
    Failed,
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
