//! mDNS candidate mode
//!
//! Browsers hide host addresses behind `<uuid>.local` candidates. Whether we
//! resolve them, and whether we publish our own, is controlled here.

use serde::{Deserialize, Serialize};
use webrtc::ice::mdns::MulticastDnsMode;

/// Environment override for the configured mode
pub const MDNS_MODE_ENV: &str = "CLOUDAPP_RTC_MDNS_MODE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MdnsMode {
    Disabled,
    /// Resolve remote `.local` candidates only
    #[default]
    QueryOnly,
    /// Also publish our own host candidates as `.local`
    QueryAndGather,
}

impl MdnsMode {
    /// Parse a user supplied mode, accepting a few common spellings
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "disabled" | "off" | "false" | "0" => Some(Self::Disabled),
            "query" | "query_only" | "query-only" => Some(Self::QueryOnly),
            "gather" | "query_and_gather" | "query-and-gather" | "on" | "true" | "1" => {
                Some(Self::QueryAndGather)
            }
            _ => None,
        }
    }

    /// Mode from `CLOUDAPP_RTC_MDNS_MODE`, if set to something valid
    pub fn from_env() -> Option<Self> {
        let raw = std::env::var(MDNS_MODE_ENV).ok()?;
        let mode = Self::parse(&raw);
        if mode.is_none() && !raw.trim().is_empty() {
            tracing::warn!("Ignoring invalid {}={:?}", MDNS_MODE_ENV, raw);
        }
        mode
    }

    /// Environment override, falling back to `configured`
    pub fn effective(configured: Self) -> Self {
        Self::from_env().unwrap_or(configured)
    }

    /// Host name to publish when gathering, unique per negotiation session
    pub fn host_name(generation: u64) -> String {
        format!("cloudapp-rtc-{}-{}.local", std::process::id(), generation)
    }
}

impl From<MdnsMode> for MulticastDnsMode {
    fn from(mode: MdnsMode) -> Self {
        match mode {
            MdnsMode::Disabled => MulticastDnsMode::Disabled,
            MdnsMode::QueryOnly => MulticastDnsMode::QueryOnly,
            MdnsMode::QueryAndGather => MulticastDnsMode::QueryAndGather,
        }
    }
}

impl std::fmt::Display for MdnsMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MdnsMode::Disabled => write!(f, "disabled"),
            MdnsMode::QueryOnly => write!(f, "query_only"),
            MdnsMode::QueryAndGather => write!(f, "query_and_gather"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spellings() {
        assert_eq!(MdnsMode::parse("OFF"), Some(MdnsMode::Disabled));
        assert_eq!(MdnsMode::parse(" query-only "), Some(MdnsMode::QueryOnly));
        assert_eq!(MdnsMode::parse("1"), Some(MdnsMode::QueryAndGather));
        assert_eq!(MdnsMode::parse("sometimes"), None);
        assert_eq!(MdnsMode::parse(""), None);
    }

    #[test]
    fn test_serde_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: MdnsMode,
        }
        let w: Wrapper = toml::from_str("mode = \"query_and_gather\"").unwrap();
        assert_eq!(w.mode, MdnsMode::QueryAndGather);
        assert_eq!(w.mode.to_string(), "query_and_gather");
    }

    #[test]
    fn test_host_name_is_local() {
        let name = MdnsMode::host_name(3);
        assert!(name.ends_with("-3.local"));
    }
}
