use std::net::SocketAddr;
use std::time::Duration;

/// Relay settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind: SocketAddr,
    /// How long a peer whose transport dropped keeps its room membership.
    pub eviction_grace: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 3000)),
            eviction_grace: Duration::from_secs(10),
        }
    }
}
