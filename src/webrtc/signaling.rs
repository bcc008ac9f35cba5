//! WebRTC signaling types and messages
//!
//! Everything on the relay is a flat packet `{type, data, packet_id, session_id}`.
//! Descriptions and candidates travel inside `data` as base64(JSON(..)).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Relay packet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayPacket {
    #[serde(rename = "type")]
    pub packet_type: String,
    pub data: String,
    pub packet_id: String,
    pub session_id: String,
}

impl RelayPacket {
    /// Parse a text frame from the relay
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| AppError::Decode(format!("Invalid relay packet: {}", e)))
    }
}

/// Messages this client sends to the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingMessage {
    /// A new negotiation is beginning
    InitWebRtc { is_mobile: bool },
    /// Local candidate, base64(JSON(candidate))
    Candidate(String),
    /// Local answer, base64(JSON(description))
    Answer(String),
    /// Local offer produced by an ICE restart, base64(JSON(description))
    Offer(String),
}

impl SignalingMessage {
    /// Wire tag
    pub fn tag(&self) -> &'static str {
        match self {
            Self::InitWebRtc { .. } => "initwebrtc",
            Self::Candidate(_) => "candidate",
            Self::Answer(_) => "answer",
            Self::Offer(_) => "offer",
        }
    }

    /// Convert to a relay packet
    pub fn into_packet(self, session_id: &str) -> RelayPacket {
        let packet_type = self.tag().to_string();
        let data = match self {
            Self::InitWebRtc { is_mobile } => serde_json::json!({ "is_mobile": is_mobile }).to_string(),
            Self::Candidate(data) | Self::Answer(data) | Self::Offer(data) => data,
        };

        RelayPacket {
            packet_type,
            data,
            packet_id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
        }
    }
}

/// Messages the relay delivers to this client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundSignal {
    /// Server is ready; carries its `stunturn` string
    Init { stunturn: String },
    /// Remote offer, base64(JSON(description))
    Offer { sdp: String },
    /// Remote candidate or empty end-of-candidates sentinel
    Candidate { candidate: String },
    Heartbeat,
    Unknown { packet_type: String },
}

impl From<RelayPacket> for InboundSignal {
    fn from(packet: RelayPacket) -> Self {
        match packet.packet_type.as_str() {
            "init" => Self::Init {
                stunturn: packet.data,
            },
            "offer" => Self::Offer { sdp: packet.data },
            "candidate" => Self::Candidate {
                candidate: packet.data,
            },
            "heartbeat" => Self::Heartbeat,
            _ => Self::Unknown {
                packet_type: packet.packet_type,
            },
        }
    }
}

/// Outbound signaling seam
///
/// Implementations must not block: the controller calls `send` from its
/// single event loop.
pub trait SignalingSink: Send + Sync {
    fn send(&self, message: SignalingMessage) -> Result<()>;
}

impl SignalingSink for tokio::sync::mpsc::UnboundedSender<SignalingMessage> {
    fn send(&self, message: SignalingMessage) -> Result<()> {
        tokio::sync::mpsc::UnboundedSender::send(self, message)
            .map_err(|_| AppError::TransportDisconnect("signaling channel closed".to_string()))
    }
}

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description as browsers serialize it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate string
    pub candidate: String,
    /// SDP mid (media ID)
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    /// SDP mline index
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    /// Username fragment
    #[serde(rename = "usernameFragment", default)]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    pub fn with_mid(mut self, mid: impl Into<String>, index: u16) -> Self {
        self.sdp_mid = Some(mid.into());
        self.sdp_mline_index = Some(index);
        self
    }
}

/// Encode a payload as base64(JSON(value))
pub fn encode_payload<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)?;
    Ok(STANDARD.encode(json))
}

/// Decode a base64(JSON(value)) payload
pub fn decode_payload<T: DeserializeOwned>(data: &str) -> Result<T> {
    let raw = STANDARD
        .decode(data.trim())
        .map_err(|e| AppError::Decode(format!("Invalid base64: {}", e)))?;
    serde_json::from_slice(&raw).map_err(|e| AppError::Decode(format!("Invalid JSON: {}", e)))
}

/// Connection state reported by the primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::New => write!(f, "new"),
            ConnectionState::Checking => write!(f, "checking"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Completed => write!(f, "completed"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Failed => write!(f, "failed"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Candidate gathering state reported by the primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatheringState {
    New,
    Gathering,
    Complete,
}
