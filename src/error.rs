use thiserror::Error;

/// Application-wide error type
///
/// The first four variants are the negotiation taxonomy. Each one implies a
/// different recovery policy in the controller:
/// - `Decode`: drop the offending payload, keep the session
/// - `Negotiation`: abort the session until the next `start`
/// - `CandidateApply`: skip one candidate, keep flushing
/// - `TransportDisconnect`: publish `ConnectionClosed`, leave recovery to the caller
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Negotiation error: {0}")]
    Negotiation(String),

    #[error("Candidate rejected: {0}")]
    CandidateApply(String),

    #[error("Transport disconnected: {0}")]
    TransportDisconnect(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WebRTC error: {0}")]
    WebRtcError(String),
}

impl AppError {
    /// Whether the error leaves the current negotiation session unusable
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, AppError::Negotiation(_))
    }

    /// Short machine-readable kind, used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Decode(_) => "decode",
            AppError::Negotiation(_) => "negotiation",
            AppError::CandidateApply(_) => "candidate_apply",
            AppError::TransportDisconnect(_) => "transport_disconnect",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Serialization(_) => "serialization",
            AppError::WebRtcError(_) => "webrtc",
        }
    }
}

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, AppError>;
