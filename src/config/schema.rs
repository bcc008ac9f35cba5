use serde::{Deserialize, Serialize};

pub use crate::webrtc::config::WebRtcConfig;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Signaling relay connection
    pub relay: RelayConfig,
    /// Negotiation and ICE settings
    pub webrtc: WebRtcConfig,
}

/// Signaling relay configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// WebSocket URL of the relay
    pub url: String,
    /// Echoed in every outbound packet
    pub session_id: Option<String>,
    /// Reported to the server in `initwebrtc`
    pub is_mobile: bool,
    /// WebSocket ping interval, 0 disables
    pub heartbeat_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            session_id: None,
            is_mobile: false,
            heartbeat_interval_secs: 2,
        }
    }
}
