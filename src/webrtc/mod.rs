//! WebRTC negotiation for cloud app streaming
//!
//! The remote app server sends the offer; we answer, trickle candidates in
//! both directions and keep the connection alive:
//!
//! ```text
//! Relay (WebSocket)
//!        |  init / offer / candidate
//!        v
//! EventBus ──► RtcService (single task) ──► RtcController
//!                                                |
//!                                                v
//!                                         PeerConnection (webrtc-rs)
//!                                           |            |
//!                                   inbound tracks   DataChannel
//!                                           |            ^
//!                                           v            |
//!                                       MediaSink    input events
//! ```

pub mod config;
pub mod controller;
pub mod mdns;
pub mod media;
pub mod peer;
pub mod rtc_peer;
pub mod sdp;
pub mod service;
mod session;
pub mod signaling;

pub use config::{IceConfig, IceServer, RestartPolicy, WebRtcConfig};
pub use controller::{ControllerStatus, RtcController};
pub use media::{LogSink, MediaSink, MediaStream, SinkHandle};
pub use peer::{PeerConnection, PeerEvent, PeerFactory};
pub use rtc_peer::{RtcPeer, RtcPeerFactory};
pub use service::RtcService;
pub use signaling::{ConnectionState, IceCandidate, SessionDescription, SignalingMessage, SignalingSink};
