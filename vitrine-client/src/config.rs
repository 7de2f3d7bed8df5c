use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;
use vitrine_core::IceServerConfig;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Settings supplied by the host application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamingConfig {
    /// Base URL of the signaling relay, e.g. `ws://localhost:3000`.
    pub signaling_url: String,
    pub ice_servers: Vec<IceServerConfig>,
    /// Bound on how long `join_room` waits for the first connected peer.
    pub join_timeout_ms: u64,
    /// How long a failed connection waits for its ICE restart to land.
    pub ice_restart_timeout_ms: u64,
    pub reconnect: ReconnectPolicy,
    pub video: VideoConstraints,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:3000".to_owned(),
            ice_servers: vec![IceServerConfig::stun(DEFAULT_STUN_SERVER)],
            join_timeout_ms: 10_000,
            ice_restart_timeout_ms: 5_000,
            reconnect: ReconnectPolicy::default(),
            video: VideoConstraints::default(),
        }
    }
}

impl StreamingConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let relay = Url::parse(&self.signaling_url).map_err(|e| {
            ConfigError::Invalid(format!("signalingUrl '{}': {}", self.signaling_url, e))
        })?;
        if !matches!(relay.scheme(), "ws" | "wss" | "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "signalingUrl must use ws, wss, http or https, got '{}'",
                relay.scheme()
            )));
        }
        if self.ice_servers.is_empty() {
            return Err(ConfigError::Invalid("at least one ICE server is required".into()));
        }
        if self.ice_servers.iter().any(|s| s.urls.is_empty()) {
            return Err(ConfigError::Invalid("ICE server without urls".into()));
        }
        if self.join_timeout_ms == 0 {
            return Err(ConfigError::Invalid("joinTimeoutMs must be positive".into()));
        }
        if self.ice_restart_timeout_ms == 0 {
            return Err(ConfigError::Invalid("iceRestartTimeoutMs must be positive".into()));
        }
        self.reconnect.validate()
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn ice_restart_timeout(&self) -> Duration {
        Duration::from_millis(self.ice_restart_timeout_ms)
    }
}

/// Capped exponential backoff for signaling reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            max_attempts: 6,
        }
    }
}

impl ReconnectPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("reconnect.maxAttempts must be positive".into()));
        }
        if self.base_delay_ms == 0 || self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::Invalid(
                "reconnect delays must satisfy 0 < baseDelayMs <= maxDelayMs".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VideoConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        Self {
            ideal_width: 1280,
            ideal_height: 720,
        }
    }
}
