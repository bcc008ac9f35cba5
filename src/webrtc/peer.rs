//! Peer connection primitive seam
//!
//! The controller never talks to the `webrtc` crate directly. It drives a
//! `PeerConnection` created by a `PeerFactory`, and receives the
//! primitive's callbacks as `PeerEvent`s on a channel. Every event is tagged
//! with the generation of the peer that produced it, so callbacks from a
//! peer replaced by a later `start` can be recognised and ignored.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::config::IceServer;
use super::media::InboundTrack;
use super::signaling::{ConnectionState, GatheringState, IceCandidate, SessionDescription};
use crate::error::Result;

/// Callback delivered by the primitive
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// The remote-created data channel opened
    DataChannelOpen { label: String },
    /// The data channel closed
    DataChannelClose { label: String },
    /// A local candidate was discovered; `None` ends discovery
    LocalCandidate(Option<IceCandidate>),
    GatheringStateChange(GatheringState),
    ConnectionStateChange(ConnectionState),
    /// An inbound media track arrived
    Track(InboundTrack),
}

/// Peer event with the generation of the peer that emitted it
#[derive(Debug, Clone)]
pub struct TaggedPeerEvent {
    pub generation: u64,
    pub event: PeerEvent,
}

pub type PeerEventReceiver = mpsc::UnboundedReceiver<TaggedPeerEvent>;

/// Emitter handed to a primitive at creation time
#[derive(Debug, Clone)]
pub struct PeerEventSender {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedPeerEvent>,
}

impl PeerEventSender {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedPeerEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Emit an event; returns false once the controller is gone
    pub fn emit(&self, event: PeerEvent) -> bool {
        self.tx
            .send(TaggedPeerEvent {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// Platform peer connection
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Apply the remote description
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    /// Produce a local answer for the current remote offer
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Produce a local offer, optionally restarting ICE
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription>;

    /// Apply a local description
    async fn set_local_description(&self, description: SessionDescription) -> Result<()>;

    /// Apply one remote candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Send on the input data channel
    async fn send(&self, data: Bytes) -> Result<()>;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// Builds a fresh primitive for every negotiation session
#[async_trait]
pub trait PeerFactory: Send + Sync {
    type Peer: PeerConnection + 'static;

    async fn create(&self, ice_servers: Vec<IceServer>, events: PeerEventSender) -> Result<Self::Peer>;
}
