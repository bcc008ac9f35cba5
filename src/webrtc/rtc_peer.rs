//! `PeerConnection` backed by webrtc-rs

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

use super::config::{IceServer, WebRtcConfig};
use super::mdns::MdnsMode;
use super::media::{InboundTrack, TrackKind};
use super::peer::{PeerConnection, PeerEvent, PeerEventSender, PeerFactory};
use super::signaling::{ConnectionState, GatheringState, IceCandidate, SdpType, SessionDescription};
use crate::error::{AppError, Result};

/// Creates webrtc-rs peers
pub struct RtcPeerFactory {
    config: WebRtcConfig,
}

impl RtcPeerFactory {
    pub fn new(config: WebRtcConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PeerFactory for RtcPeerFactory {
    type Peer = RtcPeer;

    async fn create(&self, ice_servers: Vec<IceServer>, events: PeerEventSender) -> Result<RtcPeer> {
        RtcPeer::new(&self.config, ice_servers, events).await
    }
}

/// webrtc-rs peer connection
pub struct RtcPeer {
    generation: u64,
    pc: Arc<RTCPeerConnection>,
    /// Remote-created input channel
    data_channel: Arc<RwLock<Option<Arc<RTCDataChannel>>>>,
}

impl RtcPeer {
    async fn new(config: &WebRtcConfig, ice_servers: Vec<IceServer>, events: PeerEventSender) -> Result<Self> {
        let generation = events.generation();

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| AppError::WebRtcError(format!("Failed to register interceptors: {}", e)))?;

        let mut setting_engine = SettingEngine::default();
        let mode = MdnsMode::effective(config.mdns_mode);
        let rtc_mode: MulticastDnsMode = mode.into();
        setting_engine.set_ice_multicast_dns_mode(rtc_mode);
        if mode == MdnsMode::QueryAndGather {
            setting_engine.set_multicast_dns_host_name(MdnsMode::host_name(generation));
        }
        debug!("mDNS mode {} for peer {}", mode, generation);

        let api = APIBuilder::new()
            .with_setting_engine(setting_engine)
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers
                .into_iter()
                .map(|server| RTCIceServer {
                    urls: server.urls,
                    username: server.username,
                    credential: server.credential,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let pc = api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create peer connection: {}", e)))?;

        let peer = Self {
            generation,
            pc: Arc::new(pc),
            data_channel: Arc::new(RwLock::new(None)),
        };
        peer.setup_event_handlers(events, config.data_channel_label.clone());

        info!("Peer {} created", generation);
        Ok(peer)
    }

    fn setup_event_handlers(&self, events: PeerEventSender, channel_label: Option<String>) {
        let tx = events.clone();
        self.pc
            .on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
                let state = match s {
                    RTCIceConnectionState::New => Some(ConnectionState::New),
                    RTCIceConnectionState::Checking => Some(ConnectionState::Checking),
                    RTCIceConnectionState::Connected => Some(ConnectionState::Connected),
                    RTCIceConnectionState::Completed => Some(ConnectionState::Completed),
                    RTCIceConnectionState::Disconnected => Some(ConnectionState::Disconnected),
                    RTCIceConnectionState::Failed => Some(ConnectionState::Failed),
                    RTCIceConnectionState::Closed => Some(ConnectionState::Closed),
                    _ => None,
                };
                if let Some(state) = state {
                    tx.emit(PeerEvent::ConnectionStateChange(state));
                }
                Box::pin(async {})
            }));

        let tx = events.clone();
        self.pc
            .on_ice_gathering_state_change(Box::new(move |s: RTCIceGathererState| {
                let state = match s {
                    RTCIceGathererState::New => Some(GatheringState::New),
                    RTCIceGathererState::Gathering => Some(GatheringState::Gathering),
                    RTCIceGathererState::Complete => Some(GatheringState::Complete),
                    _ => None,
                };
                if let Some(state) = state {
                    tx.emit(PeerEvent::GatheringStateChange(state));
                }
                Box::pin(async {})
            }));

        let tx = events.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let local = match candidate {
                    None => Some(None),
                    Some(c) => match c.to_json() {
                        Ok(init) => Some(Some(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        })),
                        Err(e) => {
                            warn!("Failed to serialize local candidate: {}", e);
                            None
                        }
                    },
                };
                if let Some(local) = local {
                    tx.emit(PeerEvent::LocalCandidate(local));
                }
                Box::pin(async {})
            }));

        let tx = events.clone();
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    RTPCodecType::Video => TrackKind::Video,
                    _ => TrackKind::Unknown,
                };
                let mut inbound = InboundTrack::new(track.id(), track.stream_id(), kind);
                inbound.remote = Some(track);
                tx.emit(PeerEvent::Track(inbound));
                Box::pin(async {})
            },
        ));

        let data_channel = self.data_channel.clone();
        self.pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let data_channel = data_channel.clone();
            let tx = events.clone();
            let expected = channel_label.clone();

            Box::pin(async move {
                let label = dc.label().to_string();
                if !accepts_label(expected.as_deref(), &label) {
                    info!("Ignoring data channel '{}'", label);
                    return;
                }
                debug!("Data channel announced: {}", label);
                *data_channel.write().await = Some(dc.clone());

                let open_tx = tx.clone();
                let open_label = label.clone();
                dc.on_open(Box::new(move || {
                    open_tx.emit(PeerEvent::DataChannelOpen {
                        label: open_label.clone(),
                    });
                    Box::pin(async {})
                }));

                let close_label = label.clone();
                let closing = Arc::downgrade(&dc);
                dc.on_close(Box::new(move || {
                    let data_channel = data_channel.clone();
                    let tx = tx.clone();
                    let label = close_label.clone();
                    let closing = closing.clone();
                    Box::pin(async move {
                        let Some(closing) = closing.upgrade() else { return };
                        if clear_if_current(&data_channel, &closing).await {
                            tx.emit(PeerEvent::DataChannelClose { label });
                        } else {
                            debug!("Replaced data channel '{}' closed", label);
                        }
                    })
                }));
            })
        }));
    }
}

/// Whether a remote channel is the input channel
fn accepts_label(expected: Option<&str>, label: &str) -> bool {
    expected.map_or(true, |expected| expected == label)
}

/// Empty the slot if it still holds `closing`
///
/// A later channel may have replaced the one that is closing.
async fn clear_if_current<T>(slot: &RwLock<Option<Arc<T>>>, closing: &Arc<T>) -> bool {
    let mut slot = slot.write().await;
    match slot.as_ref() {
        Some(current) if Arc::ptr_eq(current, closing) => {
            *slot = None;
            true
        }
        _ => false,
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription> {
    let parsed = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpType::Rollback => {
            return Err(AppError::WebRtcError("Rollback descriptions are not supported".to_string()))
        }
    };
    parsed.map_err(|e| AppError::WebRtcError(format!("Invalid SDP: {}", e)))
}

fn from_rtc_description(description: RTCSessionDescription) -> Result<SessionDescription> {
    let sdp_type = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        other => return Err(AppError::WebRtcError(format!("Unexpected SDP type: {:?}", other))),
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: description.sdp,
    })
}

#[async_trait]
impl PeerConnection for RtcPeer {
    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let description = to_rtc_description(description)?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(|e| AppError::WebRtcError(e.to_string()))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::WebRtcError(e.to_string()))?;
        from_rtc_description(answer)
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription> {
        let options = RTCOfferOptions {
            ice_restart,
            ..Default::default()
        };
        let offer = self
            .pc
            .create_offer(Some(options))
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create offer: {}", e)))?;
        from_rtc_description(offer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        let description = to_rtc_description(description)?;
        self.pc
            .set_local_description(description)
            .await
            .map_err(|e| AppError::WebRtcError(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| AppError::WebRtcError(e.to_string()))
    }

    async fn send(&self, data: Bytes) -> Result<()> {
        let guard = self.data_channel.read().await;
        let Some(dc) = guard.as_ref() else {
            return Err(AppError::WebRtcError("Data channel not open".to_string()));
        };

        // Input events are JSON; keep them as text messages like a browser would
        let sent = match std::str::from_utf8(&data) {
            Ok(text) => dc.send_text(text.to_string()).await,
            Err(_) => dc.send(&data).await,
        };
        sent.map(|_| ())
            .map_err(|e| AppError::WebRtcError(format!("Failed to send on data channel: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        *self.data_channel.write().await = None;
        self.pc
            .close()
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to close peer {}: {}", self.generation, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::webrtc::config::IceConfig;
    use crate::webrtc::controller::RtcController;
    use crate::webrtc::media::{LogSink, SinkHandle};
    use crate::webrtc::signaling::{decode_payload, encode_payload, SignalingMessage};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use webrtc::api::media_engine::MIME_TYPE_OPUS;
    use webrtc::data_channel::data_channel_message::DataChannelMessage;
    use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
    use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

    const ANSWER_SDP: &str = "v=0\r\n\
        o=- 0 0 IN IP4 127.0.0.1\r\n\
        s=-\r\n\
        t=0 0\r\n\
        m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
        a=fmtp:111 minptime=10;useinbandfec=1\r\n";

    #[test]
    fn test_description_conversion() {
        let rtc = to_rtc_description(SessionDescription::answer(ANSWER_SDP)).unwrap();
        assert_eq!(rtc.sdp_type, RTCSdpType::Answer);

        let back = from_rtc_description(rtc).unwrap();
        assert_eq!(back, SessionDescription::answer(ANSWER_SDP));

        assert!(to_rtc_description(SessionDescription::answer("v=0\r\n")).is_err());

        let rollback = SessionDescription {
            sdp_type: SdpType::Rollback,
            sdp: String::new(),
        };
        assert!(to_rtc_description(rollback).is_err());
    }

    #[test]
    fn test_accepts_label() {
        assert!(accepts_label(None, "anything"));
        assert!(accepts_label(Some("app-input"), "app-input"));
        assert!(!accepts_label(Some("app-input"), "chat"));
    }

    #[tokio::test]
    async fn test_stale_close_keeps_newer_channel() {
        let first = Arc::new("first".to_string());
        let second = Arc::new("second".to_string());
        let slot = RwLock::new(Some(second.clone()));

        assert!(!clear_if_current(&slot, &first).await);
        assert!(slot.read().await.as_ref().is_some_and(|c| Arc::ptr_eq(c, &second)));

        assert!(clear_if_current(&slot, &second).await);
        assert!(slot.read().await.is_none());
        assert!(!clear_if_current(&slot, &second).await);
    }

    #[tokio::test]
    async fn test_factory_creates_closable_peer() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let config = WebRtcConfig {
            mdns_mode: MdnsMode::Disabled,
            ..Default::default()
        };
        let factory = RtcPeerFactory::new(config);

        let peer = factory.create(vec![], PeerEventSender::new(7, tx)).await.unwrap();
        assert!(peer.send(Bytes::from_static(b"{}")).await.is_err());
        peer.close().await.unwrap();
    }

    /// App server side: Opus audio plus the input channel, fully gathered offer
    async fn app_server() -> (Arc<RTCPeerConnection>, String, mpsc::UnboundedReceiver<Bytes>) {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().unwrap();
        let registry = register_default_interceptors(Registry::new(), &mut media_engine).unwrap();
        let mut setting_engine = SettingEngine::default();
        setting_engine.set_ice_multicast_dns_mode(MulticastDnsMode::Disabled);
        let api = APIBuilder::new()
            .with_setting_engine(setting_engine)
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        let server = Arc::new(api.new_peer_connection(RTCConfiguration::default()).await.unwrap());

        let audio = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            "audio".to_owned(),
            "app".to_owned(),
        ));
        server.add_track(audio).await.unwrap();

        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let input = server.create_data_channel("app-input", None).await.unwrap();
        input.on_message(Box::new(move |msg: DataChannelMessage| {
            let _ = msg_tx.send(msg.data);
            Box::pin(async {})
        }));

        let offer = server.create_offer(None).await.unwrap();
        let mut gathered = server.gathering_complete_promise().await;
        server.set_local_description(offer).await.unwrap();
        let _ = gathered.recv().await;
        let offer = server.local_description().await.unwrap();

        let encoded = encode_payload(&SessionDescription::offer(offer.sdp)).unwrap();
        (server, encoded, msg_rx)
    }

    #[tokio::test]
    async fn test_answers_opus_offer_and_opens_input() {
        let (server, offer, mut messages) = app_server().await;

        let config = WebRtcConfig {
            mdns_mode: MdnsMode::Disabled,
            data_channel_label: Some("app-input".into()),
            ..Default::default()
        };
        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
        let (mut controller, mut peer_rx) = RtcController::new(
            RtcPeerFactory::new(config.clone()),
            signal_tx,
            Arc::new(EventBus::new()),
            config,
        );

        controller.start(IceConfig::from_stunturn("none")).await.unwrap();
        controller
            .set_remote_description(&offer, SinkHandle::new(LogSink::default()))
            .await
            .unwrap();
        assert!(controller.status().remote_answered);
        assert!(!controller.status().aborted);

        let mut answer = None;
        while let Ok(msg) = signal_rx.try_recv() {
            if let SignalingMessage::Answer(data) = msg {
                answer = Some(data);
            }
        }
        let answer: SessionDescription = decode_payload(&answer.expect("no answer signaled")).unwrap();
        assert_eq!(answer.sdp.matches(";stereo=1;sprop-stereo=1").count(), 1);
        server
            .set_remote_description(RTCSessionDescription::answer(answer.sdp).unwrap())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(10), async {
            while !controller.is_input_ready() || !controller.is_connected() {
                tokio::select! {
                    Some(tagged) = peer_rx.recv() => controller.handle_peer_event(tagged).await,
                    Some(msg) = signal_rx.recv() => {
                        if let SignalingMessage::Candidate(data) = msg {
                            let candidate: IceCandidate = decode_payload(&data).unwrap();
                            let _ = server
                                .add_ice_candidate(RTCIceCandidateInit {
                                    candidate: candidate.candidate,
                                    sdp_mid: candidate.sdp_mid,
                                    sdp_mline_index: candidate.sdp_mline_index,
                                    username_fragment: candidate.username_fragment,
                                })
                                .await;
                        }
                    }
                }
            }
        })
        .await
        .expect("input channel did not open");

        assert!(controller.input(Bytes::from_static(b"{\"type\":\"KEYDOWN\"}")).await);
        let received = tokio::time::timeout(Duration::from_secs(5), messages.recv())
            .await
            .expect("input not delivered");
        assert_eq!(received, Some(Bytes::from_static(b"{\"type\":\"KEYDOWN\"}")));

        controller.close().await;
        server.close().await.unwrap();
    }
}
