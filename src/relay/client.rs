//! WebSocket relay client

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};
use crate::webrtc::media::SinkHandle;
use crate::webrtc::signaling::{InboundSignal, RelayPacket, SignalingMessage};

type RelayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Relay client
///
/// Writes every `SignalingMessage` from the controller as a relay packet and
/// turns inbound packets into bus events.
pub struct RelayClient {
    config: RelayConfig,
    session_id: String,
    events: Arc<EventBus>,
    sink: SinkHandle,
    stunturn_override: Option<String>,
}

impl RelayClient {
    /// Create a client; offers are answered with `sink` as the media target
    pub fn new(config: RelayConfig, events: Arc<EventBus>, sink: SinkHandle) -> Self {
        let session_id = config
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Self {
            config,
            session_id,
            events,
            sink,
            stunturn_override: None,
        }
    }

    /// Ignore the server's `stunturn` and use this one instead
    pub fn with_stunturn(mut self, stunturn: Option<String>) -> Self {
        self.stunturn_override = stunturn;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Connect and spawn the socket task
    ///
    /// The task ends when the socket drops or `outbound` closes, publishing
    /// `ConnectionClosed` and `SignalingClosed` on the way out.
    pub async fn connect(self, outbound: mpsc::UnboundedReceiver<SignalingMessage>) -> Result<JoinHandle<()>> {
        let (ws, _) = connect_async(self.config.url.as_str())
            .await
            .map_err(|e| AppError::TransportDisconnect(format!("Failed to connect to {}: {}", self.config.url, e)))?;

        info!("Connected to relay {} (session {})", self.config.url, self.session_id);
        Ok(tokio::spawn(self.run(ws, outbound)))
    }

    async fn run(self, ws: RelayStream, mut outbound: mpsc::UnboundedReceiver<SignalingMessage>) {
        let (mut write, mut read) = ws.split();

        let heartbeat_secs = self.config.heartbeat_interval_secs;
        let mut heartbeat = tokio::time::interval(Duration::from_secs(heartbeat_secs.max(1)));
        heartbeat.tick().await;

        let reason = loop {
            tokio::select! {
                message = outbound.recv() => match message {
                    Some(message) => {
                        let tag = message.tag();
                        let text = match self.encode(message) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("Failed to encode {} packet: {}", tag, e);
                                continue;
                            }
                        };
                        debug!("Relay <- {}", tag);
                        if let Err(e) = write.send(Message::Text(text.into())).await {
                            break format!("write failed: {}", e);
                        }
                    }
                    None => {
                        let _ = write.send(Message::Close(None)).await;
                        break "client shutdown".to_string();
                    }
                },
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => self.handle_text(text),
                        Err(_) => warn!("Dropping non UTF-8 binary frame ({} bytes)", data.len()),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        break format!("closed by relay: {:?}", frame);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break format!("read failed: {}", e),
                    None => break "stream ended".to_string(),
                },
                _ = heartbeat.tick(), if heartbeat_secs > 0 => {
                    if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                        break format!("heartbeat failed: {}", e);
                    }
                }
            }
        };

        warn!("Relay connection lost: {}", reason);
        let error = AppError::TransportDisconnect(reason);
        self.events.publish(SystemEvent::ConnectionClosed);
        self.events.publish(SystemEvent::SignalingClosed {
            reason: error.to_string(),
        });
    }

    fn encode(&self, message: SignalingMessage) -> Result<String> {
        Ok(serde_json::to_string(&message.into_packet(&self.session_id))?)
    }

    fn handle_text(&self, text: &str) {
        let packet = match RelayPacket::parse(text) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("{}", e);
                return;
            }
        };

        if !packet.session_id.is_empty() && packet.session_id != self.session_id {
            debug!("Packet for session {} on session {}", packet.session_id, self.session_id);
        }

        if let Some(event) = self.route(packet) {
            self.events.publish(event);
        }
    }

    /// Map an inbound packet onto its bus topic
    fn route(&self, packet: RelayPacket) -> Option<SystemEvent> {
        match InboundSignal::from(packet) {
            InboundSignal::Init { stunturn } => {
                info!("Relay -> init");
                let stunturn = self.stunturn_override.clone().unwrap_or(stunturn);
                Some(SystemEvent::MediaStreamInitialized { stunturn })
            }
            InboundSignal::Offer { sdp } => {
                info!("Relay -> offer");
                Some(SystemEvent::MediaStreamSdpAvailable {
                    sdp,
                    sink: self.sink.clone(),
                })
            }
            InboundSignal::Candidate { candidate } => {
                debug!("Relay -> candidate");
                Some(SystemEvent::MediaStreamCandidateAdd { candidate })
            }
            InboundSignal::Heartbeat => None,
            InboundSignal::Unknown { packet_type } => {
                debug!("Ignoring relay packet '{}'", packet_type);
                None
            }
        }
    }
}
