//! Negotiation and ICE controller
//!
//! Owns one negotiation session at a time on top of a `PeerConnection`:
//!
//! ```text
//!  start(ice) ──► new peer (generation N) ──► initwebrtc
//!                     │
//!  offer ──► set_remote_description ──► create_answer ──► set_local_description
//!                     │                                       │
//!                     │                                 stereo patch
//!                     │                                       │
//!                     │            remote_answered ──► flush request ──► answer
//!                     ▼
//!  candidate ──► add_candidate ──► pending buffer ──► flush_candidate ──► peer
//! ```
//!
//! All methods take `&mut self`: the service runs the controller on a single
//! task, which is what serializes primitive callbacks against signaling.

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use super::config::{IceConfig, RestartPolicy, WebRtcConfig};
use super::media::SinkHandle;
use super::peer::{PeerConnection, PeerEvent, PeerEventReceiver, PeerEventSender, PeerFactory, TaggedPeerEvent};
use super::sdp::force_opus_stereo;
use super::session::NegotiationSession;
use super::signaling::{
    decode_payload, encode_payload, ConnectionState, GatheringState, IceCandidate, SdpType,
    SessionDescription, SignalingMessage, SignalingSink,
};
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::utils::LogThrottler;

pub use super::session::ControllerStatus;

const THROTTLE_INPUT_DROPPED: &str = "input_dropped";
const THROTTLE_INPUT_FAILED: &str = "input_failed";

/// Negotiation and ICE controller
pub struct RtcController<F: PeerFactory, S: SignalingSink> {
    factory: F,
    signaling: S,
    events: Arc<EventBus>,
    config: WebRtcConfig,
    is_mobile: bool,
    peer_tx: mpsc::UnboundedSender<TaggedPeerEvent>,
    next_generation: u64,
    session: Option<NegotiationSession<F::Peer>>,
    status: watch::Sender<ControllerStatus>,
    throttler: LogThrottler,
}

impl<F: PeerFactory, S: SignalingSink> RtcController<F, S> {
    /// Create a controller
    ///
    /// Returns the receiver on which primitives deliver their callbacks; feed
    /// every event back through `handle_peer_event`.
    pub fn new(
        factory: F,
        signaling: S,
        events: Arc<EventBus>,
        config: WebRtcConfig,
    ) -> (Self, PeerEventReceiver) {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(ControllerStatus::default());

        let controller = Self {
            factory,
            signaling,
            events,
            config,
            is_mobile: false,
            peer_tx,
            next_generation: 0,
            session: None,
            status,
            throttler: LogThrottler::default(),
        };

        (controller, peer_rx)
    }

    /// Report this client as mobile in `initwebrtc`
    pub fn with_mobile(mut self, is_mobile: bool) -> Self {
        self.is_mobile = is_mobile;
        self
    }

    /// Begin a new negotiation session
    ///
    /// Any previous session is closed first; its buffered candidates are
    /// discarded and its late callbacks ignored.
    pub async fn start(&mut self, ice: IceConfig) -> Result<()> {
        self.teardown().await;

        self.next_generation += 1;
        let generation = self.next_generation;
        let servers = ice.resolve(&self.config);
        info!(
            "Starting negotiation session {} with {} ICE server(s)",
            generation,
            servers.len()
        );

        let emitter = PeerEventSender::new(generation, self.peer_tx.clone());
        let peer = match self.factory.create(servers, emitter).await {
            Ok(peer) => peer,
            Err(e) => {
                self.publish_status();
                return Err(AppError::Negotiation(format!("Failed to create peer connection: {}", e)));
            }
        };

        self.session = Some(NegotiationSession::new(generation, peer, ice));
        self.publish_status();

        self.signaling.send(SignalingMessage::InitWebRtc {
            is_mobile: self.is_mobile,
        })
    }

    /// Answer a remote offer
    ///
    /// A payload that fails to decode is rejected before the session or the
    /// primitive is touched. A failure of the description exchange aborts the
    /// session until the next `start`.
    pub async fn set_remote_description(&mut self, encoded_offer: &str, sink: SinkHandle) -> Result<()> {
        let offer: SessionDescription = decode_payload(encoded_offer)?;
        if offer.sdp_type != SdpType::Offer {
            return Err(AppError::Decode(format!(
                "Expected an offer, got {:?}",
                offer.sdp_type
            )));
        }

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| AppError::Negotiation("No active session, call start first".to_string()))?;
        if session.aborted {
            return Err(AppError::Negotiation(format!(
                "Session {} was aborted, waiting for a new start",
                session.generation
            )));
        }

        debug!("Applying remote offer for session {}", session.generation);
        let answer = match answer_offer(&session.peer, offer).await {
            Ok(answer) => answer,
            Err(e) => {
                error!("Negotiation of session {} failed: {}", session.generation, e);
                session.aborted = true;
                self.publish_status();
                return Err(e);
            }
        };

        session.remote_answered = true;
        self.events.publish(SystemEvent::MediaStreamCandidateFlush);
        sink.attach(session.media.clone());
        info!("Session {} answered", session.generation);
        self.publish_status();

        let encoded = encode_payload(&answer)?;
        self.signaling.send(SignalingMessage::Answer(encoded))
    }

    /// Buffer a remote candidate
    ///
    /// An empty payload is the end-of-candidates sentinel and only publishes
    /// a flush request. Candidates are never applied here.
    pub fn add_candidate(&mut self, encoded_candidate: &str) {
        if encoded_candidate.trim().is_empty() {
            debug!("Remote candidates complete, requesting flush");
            self.events.publish(SystemEvent::MediaStreamCandidateFlush);
            return;
        }

        match self.session.as_mut() {
            Some(session) => {
                session.pending_candidates.push(encoded_candidate.to_string());
                trace!(
                    "Buffered remote candidate ({} pending)",
                    session.pending_candidates.len()
                );
            }
            None => warn!("Dropping remote candidate: no active session"),
        }
        self.publish_status();
    }

    /// Apply buffered candidates in arrival order
    ///
    /// No-op until the local answer exists; the buffer then stays intact for
    /// a later flush. Rejected candidates are logged and skipped. Returns the
    /// number of candidates the primitive accepted.
    pub async fn flush_candidate(&mut self) -> usize {
        let Some(session) = self.session.as_mut() else {
            return 0;
        };
        if session.flushing || !session.remote_answered || session.aborted {
            debug!(
                "Flush skipped (flushing={}, answered={}, aborted={})",
                session.flushing, session.remote_answered, session.aborted
            );
            return 0;
        }

        session.flushing = true;
        let pending = std::mem::take(&mut session.pending_candidates);
        let mut applied = 0;

        for data in &pending {
            let candidate: IceCandidate = match decode_payload(data) {
                Ok(candidate) => candidate,
                Err(e) => {
                    warn!("Skipping remote candidate: {}", e);
                    continue;
                }
            };

            debug!("Adding remote candidate: {}", candidate.candidate);
            match session.peer.add_ice_candidate(candidate).await {
                Ok(()) => applied += 1,
                Err(e) => warn!("{}", AppError::CandidateApply(e.to_string())),
            }
        }

        session.flushing = false;
        debug!(
            "Flushed {}/{} remote candidates for session {}",
            applied,
            pending.len(),
            session.generation
        );
        self.publish_status();
        applied
    }

    /// Forward a serialized input event over the data channel
    ///
    /// Returns whether the event was handed to the channel. Events sent
    /// while the channel is not open are dropped.
    pub async fn input(&mut self, data: Bytes) -> bool {
        let ready = self.session.as_ref().map(|s| s.input_ready).unwrap_or(false);
        if !ready {
            if let Some(suppressed) = self.throttler.should_log(THROTTLE_INPUT_DROPPED) {
                debug!("Input channel not open, dropping input ({} suppressed)", suppressed);
            }
            return false;
        }

        let Some(session) = self.session.as_ref() else {
            return false;
        };
        match session.peer.send(data).await {
            Ok(()) => true,
            Err(e) => {
                if let Some(suppressed) = self.throttler.should_log(THROTTLE_INPUT_FAILED) {
                    warn!("Failed to send input: {} ({} suppressed)", e, suppressed);
                }
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().connected
    }

    pub fn is_input_ready(&self) -> bool {
        self.status.borrow().input_ready
    }

    pub fn status(&self) -> ControllerStatus {
        *self.status.borrow()
    }

    /// Subscribe to status changes
    pub fn status_watch(&self) -> watch::Receiver<ControllerStatus> {
        self.status.subscribe()
    }

    /// Handle a callback from the primitive
    pub async fn handle_peer_event(&mut self, tagged: TaggedPeerEvent) {
        let Some(session) = self.session.as_mut() else {
            trace!("Ignoring peer event without a session: {:?}", tagged.event);
            return;
        };
        if tagged.generation != session.generation {
            trace!(
                "Ignoring event from stale peer generation {} (current {})",
                tagged.generation,
                session.generation
            );
            return;
        }

        match tagged.event {
            PeerEvent::DataChannelOpen { label } => {
                info!("Input channel '{}' opened", label);
                session.input_ready = true;
                self.throttler.clear(THROTTLE_INPUT_DROPPED);
                self.events.publish(SystemEvent::ConnectionReady);
            }
            PeerEvent::DataChannelClose { label } => {
                info!("Input channel '{}' closed", label);
                session.input_ready = false;
            }
            PeerEvent::LocalCandidate(Some(candidate)) => {
                debug!("Local candidate: {}", candidate.candidate);
                let sent = encode_payload(&candidate)
                    .and_then(|data| self.signaling.send(SignalingMessage::Candidate(data)));
                if let Err(e) = sent {
                    warn!("Failed to send local candidate: {}", e);
                }
            }
            PeerEvent::LocalCandidate(None) => {
                debug!("Local candidate discovery finished");
            }
            PeerEvent::GatheringStateChange(state) => self.on_gathering_state(state),
            PeerEvent::ConnectionStateChange(state) => self.on_connection_state(state).await,
            PeerEvent::Track(track) => {
                info!("Inbound {} track {} (stream {})", track.kind, track.id, track.stream_id);
                session.media.add_track(track);
            }
        }

        self.publish_status();
    }

    /// Close the active session without starting a new one
    pub async fn close(&mut self) {
        self.teardown().await;
        self.publish_status();
    }

    fn on_gathering_state(&mut self, state: GatheringState) {
        let timeout = self.config.gathering_timeout();
        let Some(session) = self.session.as_mut() else { return };

        match state {
            GatheringState::Gathering => {
                info!("ICE gathering started");
                session.cancel_gathering_timer();
                let generation = session.generation;
                session.gathering_timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(timeout).await;
                    warn!(
                        "ICE gathering for session {} still running after {}ms",
                        generation,
                        timeout.as_millis()
                    );
                }));
            }
            GatheringState::Complete => {
                info!("ICE gathering completed");
                session.cancel_gathering_timer();
            }
            GatheringState::New => {}
        }
    }

    async fn on_connection_state(&mut self, state: ConnectionState) {
        info!("ICE connection state: {}", state);
        let Some(session) = self.session.as_mut() else { return };

        match state {
            ConnectionState::Connected | ConnectionState::Completed => {
                session.connected = true;
                session.restart_attempted = false;
            }
            ConnectionState::Disconnected => {
                session.connected = false;
                self.events.publish(SystemEvent::ConnectionClosed);
            }
            ConnectionState::Failed if !session.restart_attempted => {
                session.connected = false;
                session.restart_attempted = true;
                error!("Connection of session {} failed, restarting ICE", session.generation);
                if let Err(e) = restart_ice(&session.peer, &self.signaling).await {
                    error!("ICE restart failed: {}", e);
                }
            }
            ConnectionState::Failed => {
                session.connected = false;
                self.events.publish(SystemEvent::ConnectionClosed);
                let policy = self.config.restart_policy;
                match policy {
                    RestartPolicy::Once => {
                        error!(
                            "Connection of session {} failed again, waiting for a new session",
                            session.generation
                        );
                    }
                    RestartPolicy::Renegotiate => {
                        let ice = session.ice.clone();
                        warn!("Connection failed again, renegotiating from scratch");
                        if let Err(e) = self.start(ice).await {
                            error!("Renegotiation failed: {}", e);
                        }
                    }
                }
            }
            ConnectionState::Closed => {
                session.connected = false;
            }
            ConnectionState::New | ConnectionState::Checking => {}
        }
    }

    async fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.cancel_gathering_timer();
            if let Err(e) = session.peer.close().await {
                warn!("Failed to close peer of session {}: {}", session.generation, e);
            }
            info!(
                "Session {} closed ({} buffered candidates discarded)",
                session.generation,
                session.pending_candidates.len()
            );
        }
    }

    fn publish_status(&self) {
        let status = match &self.session {
            Some(session) => session.status(),
            None => ControllerStatus {
                generation: self.next_generation,
                ..Default::default()
            },
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

/// Remote offer → answer to signal
///
/// The primitive only accepts the answer it generated, so the stereo patch
/// goes on the signaled copy and the local description stays untouched.
async fn answer_offer<P: PeerConnection>(peer: &P, offer: SessionDescription) -> Result<SessionDescription> {
    peer.set_remote_description(offer)
        .await
        .map_err(|e| AppError::Negotiation(format!("Failed to set remote description: {}", e)))?;

    let answer = peer
        .create_answer()
        .await
        .map_err(|e| AppError::Negotiation(format!("Failed to create answer: {}", e)))?;

    peer.set_local_description(answer.clone())
        .await
        .map_err(|e| AppError::Negotiation(format!("Failed to set local description: {}", e)))?;

    Ok(SessionDescription {
        sdp: force_opus_stereo(&answer.sdp),
        ..answer
    })
}

/// Renegotiate with ICE restart and transmit the new local description
async fn restart_ice<P: PeerConnection, S: SignalingSink>(peer: &P, signaling: &S) -> Result<()> {
    let offer = peer.create_offer(true).await?;
    peer.set_local_description(offer.clone()).await?;
    signaling.send(SignalingMessage::Offer(encode_payload(&offer)?))
}
