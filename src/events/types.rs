//! System event types
//!
//! Defines all event types that can be broadcast through the event bus.

use crate::webrtc::media::SinkHandle;

/// System event enumeration
///
/// Events are fire-and-forget notifications. Distinct topics carry no
/// ordering guarantee relative to each other.
#[derive(Clone, Debug)]
pub enum SystemEvent {
    // ============================================================================
    // Consumed by the RTC controller
    // ============================================================================
    /// The relay announced a media stream; carries the raw `stunturn` string
    MediaStreamInitialized {
        /// ICE server configuration as sent by the server (may be empty)
        stunturn: String,
    },

    /// A remote offer arrived over signaling
    MediaStreamSdpAvailable {
        /// base64(JSON(offer))
        sdp: String,
        /// Where inbound media should be attached
        sink: SinkHandle,
    },

    /// A remote candidate (or the empty end-of-candidates sentinel) arrived
    MediaStreamCandidateAdd {
        /// base64(JSON(candidate)), or empty
        candidate: String,
    },

    /// Request to apply buffered remote candidates
    MediaStreamCandidateFlush,

    // ============================================================================
    // Published by the RTC controller and the relay client
    // ============================================================================
    /// Input data channel is open
    ConnectionReady,

    /// Connectivity to the remote peer was lost
    ConnectionClosed,

    /// The signaling relay socket is gone
    SignalingClosed {
        /// Human readable reason
        reason: String,
    },
}

impl SystemEvent {
    /// Get the event name (topic)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::MediaStreamInitialized { .. } => "media_stream.initialized",
            Self::MediaStreamSdpAvailable { .. } => "media_stream.sdp_available",
            Self::MediaStreamCandidateAdd { .. } => "media_stream.candidate_add",
            Self::MediaStreamCandidateFlush => "media_stream.candidate_flush",
            Self::ConnectionReady => "connection.ready",
            Self::ConnectionClosed => "connection.closed",
            Self::SignalingClosed { .. } => "signaling.closed",
        }
    }
}
