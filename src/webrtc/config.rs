//! WebRTC configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::mdns::MdnsMode;

/// Public STUN server used when nothing else is configured
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Advisory ICE gathering timeout (ms)
pub const DEFAULT_GATHERING_TIMEOUT_MS: u64 = 2000;

/// WebRTC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebRtcConfig {
    /// STUN server URLs used when the server sends an empty `stunturn`
    pub stun_servers: Vec<String>,
    /// TURN servers used when the server sends an empty `stunturn`
    pub turn_servers: Vec<TurnServer>,
    /// Advisory gathering timer, only logs when it fires
    pub gathering_timeout_ms: u64,
    /// What to do when the connection fails a second time in a row
    pub restart_policy: RestartPolicy,
    /// Only accept a data channel with this label (any label if unset)
    pub data_channel_label: Option<String>,
    /// mDNS candidate handling, overridden by `CLOUDAPP_RTC_MDNS_MODE`
    pub mdns_mode: MdnsMode,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            turn_servers: vec![],
            gathering_timeout_ms: DEFAULT_GATHERING_TIMEOUT_MS,
            restart_policy: RestartPolicy::default(),
            data_channel_label: None,
            mdns_mode: MdnsMode::default(),
        }
    }
}

impl WebRtcConfig {
    /// Gathering timeout as a `Duration`
    pub fn gathering_timeout(&self) -> Duration {
        Duration::from_millis(self.gathering_timeout_ms)
    }

    /// Default ICE servers (configured STUN + TURN)
    pub fn default_ice_servers(&self) -> Vec<IceServer> {
        let mut servers: Vec<IceServer> = self
            .stun_servers
            .iter()
            .map(|url| IceServer::new(url.clone()))
            .collect();

        for turn in &self.turn_servers {
            // webrtc-rs refuses TURN entries without credentials
            if turn.username.is_empty() || turn.credential.is_empty() {
                tracing::warn!(
                    "Skipping TURN server {:?} - credentials required but missing",
                    turn.urls
                );
                continue;
            }
            servers.push(IceServer {
                urls: turn.urls.clone(),
                username: turn.username.clone(),
                credential: turn.credential.clone(),
            });
        }

        servers
    }
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServer {
    /// TURN server URLs (UDP and TCP variants may both be listed)
    pub urls: Vec<String>,
    /// Username for TURN authentication
    pub username: String,
    /// Credential for TURN authentication
    pub credential: String,
}

/// Behaviour after a second consecutive ICE failure
///
/// The first failure always triggers one ICE restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartPolicy {
    /// Give up and wait for an external `start`
    #[default]
    Once,
    /// Tear the session down and `start` again with the last ICE config
    Renegotiate,
}

/// One ICE server entry
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IceServer {
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

impl IceServer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Default::default()
        }
    }
}

/// ICE configuration handed to `start`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IceConfig {
    /// Use the configured defaults
    #[default]
    Default,
    /// Use exactly these servers (may be empty: host candidates only)
    Servers(Vec<IceServer>),
}

impl IceConfig {
    /// Parse the `stunturn` string the server sends with `init`
    ///
    /// - `""` keeps the defaults
    /// - `"none"` disables STUN/TURN
    /// - a JSON array of `{urls, username, credential}` objects
    /// - otherwise a comma separated list of URLs
    pub fn from_stunturn(raw: &str) -> Self {
        let value = raw.trim();
        if value.is_empty() {
            return Self::Default;
        }
        if value.eq_ignore_ascii_case("none") {
            return Self::Servers(vec![]);
        }

        if value.starts_with('[') {
            match serde_json::from_str::<Vec<IceServer>>(value) {
                Ok(servers) => return Self::Servers(servers),
                Err(e) => {
                    tracing::warn!("Invalid stunturn JSON, using defaults: {}", e);
                    return Self::Default;
                }
            }
        }

        let servers = value
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(IceServer::new)
            .collect();
        Self::Servers(servers)
    }

    /// Resolve to a concrete server list
    pub fn resolve(&self, config: &WebRtcConfig) -> Vec<IceServer> {
        match self {
            Self::Default => config.default_ice_servers(),
            Self::Servers(servers) => servers.clone(),
        }
    }
}

/// Accept `"urls": "stun:..."` as well as `"urls": ["stun:...", ...]`
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stunturn_empty_uses_defaults() {
        let config = WebRtcConfig::default();
        let ice = IceConfig::from_stunturn("  ");
        assert_eq!(ice, IceConfig::Default);
        assert_eq!(ice.resolve(&config), vec![IceServer::new(DEFAULT_STUN_SERVER)]);
    }

    #[test]
    fn test_stunturn_none_disables_servers() {
        let ice = IceConfig::from_stunturn("none");
        assert!(ice.resolve(&WebRtcConfig::default()).is_empty());
    }

    #[test]
    fn test_stunturn_url_list() {
        let ice = IceConfig::from_stunturn("stun:a.example:3478, stun:b.example:3478");
        assert_eq!(
            ice,
            IceConfig::Servers(vec![
                IceServer::new("stun:a.example:3478"),
                IceServer::new("stun:b.example:3478"),
            ])
        );
    }

    #[test]
    fn test_stunturn_json() {
        let raw = r#"[{"urls":"turn:t.example:3478","username":"u","credential":"p"},
                      {"urls":["stun:s1.example","stun:s2.example"]}]"#;
        let IceConfig::Servers(servers) = IceConfig::from_stunturn(raw) else {
            panic!("expected explicit servers");
        };
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].urls, vec!["turn:t.example:3478"]);
        assert_eq!(servers[0].username, "u");
        assert_eq!(servers[1].urls.len(), 2);
    }

    #[test]
    fn test_turn_without_credentials_skipped() {
        let config = WebRtcConfig {
            stun_servers: vec![],
            turn_servers: vec![TurnServer {
                urls: vec!["turn:t.example".into()],
                username: String::new(),
                credential: String::new(),
            }],
            ..Default::default()
        };
        assert!(config.default_ice_servers().is_empty());
    }

    #[test]
    fn test_restart_policy_serde() {
        let policy: RestartPolicy = serde_json::from_str("\"renegotiate\"").unwrap();
        assert_eq!(policy, RestartPolicy::Renegotiate);
        assert_eq!(RestartPolicy::default(), RestartPolicy::Once);
    }
}
