//! Controller event loop
//!
//! Runs an `RtcController` on one task. Bus events, primitive callbacks and
//! application commands are all handled there, one at a time and to
//! completion, so a flush can never interleave with a new `start`.

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::IceConfig;
use super::controller::{ControllerStatus, RtcController};
use super::peer::{PeerEventReceiver, PeerFactory};
use super::signaling::SignalingSink;
use crate::events::{EventBus, SystemEvent};

enum Command {
    Input(Bytes),
    Shutdown,
}

/// Handle to a running controller
pub struct RtcService {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ControllerStatus>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RtcService {
    /// Spawn the event loop
    ///
    /// The bus subscription is taken before this returns, so events
    /// published right after are not missed.
    pub fn spawn<F, S>(controller: RtcController<F, S>, peer_rx: PeerEventReceiver, events: &EventBus) -> Self
    where
        F: PeerFactory + 'static,
        S: SignalingSink + 'static,
    {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let status = controller.status_watch();
        let bus_rx = events.subscribe();

        let task = tokio::spawn(run(controller, peer_rx, bus_rx, command_rx));

        Self {
            commands,
            status,
            task: Mutex::new(Some(task)),
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

    pub fn status_watch(&self) -> watch::Receiver<ControllerStatus> {
        self.status.clone()
    }

    /// Queue a serialized input event
    ///
    /// Returns false when the input channel is not open; the event is
    /// dropped in that case.
    pub fn input(&self, data: impl Into<Bytes>) -> bool {
        if !self.is_input_ready() {
            return false;
        }
        self.commands.send(Command::Input(data.into())).is_ok()
    }

    /// Stop the loop and close the active session
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Controller task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for RtcService {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

async fn run<F, S>(
    mut controller: RtcController<F, S>,
    mut peer_rx: PeerEventReceiver,
    mut bus_rx: broadcast::Receiver<SystemEvent>,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
) where
    F: PeerFactory + 'static,
    S: SignalingSink + 'static,
{
    info!("WebRTC controller running");

    loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                Some(Command::Input(data)) => {
                    controller.input(data).await;
                }
                Some(Command::Shutdown) | None => {
                    info!("WebRTC controller shutdown requested");
                    break;
                }
            },
            Some(tagged) = peer_rx.recv() => {
                controller.handle_peer_event(tagged).await;
            }
            event = bus_rx.recv() => match event {
                Ok(event) => dispatch(&mut controller, event).await,
                Err(RecvError::Lagged(n)) => {
                    warn!("Controller lagged behind the event bus, {} events lost", n);
                }
                Err(RecvError::Closed) => {
                    info!("Event bus closed");
                    break;
                }
            },
        }
    }

    controller.close().await;
    info!("WebRTC controller stopped");
}

async fn dispatch<F, S>(controller: &mut RtcController<F, S>, event: SystemEvent)
where
    F: PeerFactory,
    S: SignalingSink,
{
    match event {
        SystemEvent::MediaStreamInitialized { stunturn } => {
            if let Err(e) = controller.start(IceConfig::from_stunturn(&stunturn)).await {
                error!("Failed to start negotiation: {}", e);
            }
        }
        SystemEvent::MediaStreamSdpAvailable { sdp, sink } => {
            if let Err(e) = controller.set_remote_description(&sdp, sink).await {
                warn!("Remote offer rejected ({}): {}", e.kind(), e);
            }
        }
        SystemEvent::MediaStreamCandidateAdd { candidate } => {
            controller.add_candidate(&candidate);
        }
        SystemEvent::MediaStreamCandidateFlush => {
            controller.flush_candidate().await;
        }
        SystemEvent::SignalingClosed { reason } => {
            info!("Signaling closed: {}", reason);
        }
        other => debug!("Controller ignoring {}", other.event_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::config::WebRtcConfig;
    use crate::webrtc::media::SinkHandle;
    use crate::webrtc::peer::testing::{MockFactory, PeerCall, RecordingSink};
    use crate::webrtc::peer::PeerEvent;
    use crate::webrtc::signaling::{encode_payload, IceCandidate, SessionDescription, SignalingMessage};
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixture {
        service: RtcService,
        factory: MockFactory,
        bus: Arc<EventBus>,
        signal_rx: mpsc::UnboundedReceiver<SignalingMessage>,
    }

    fn fixture() -> Fixture {
        let factory = MockFactory::new();
        let bus = Arc::new(EventBus::new());
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (controller, peer_rx) =
            RtcController::new(factory.clone(), signal_tx, bus.clone(), WebRtcConfig::default());
        let service = RtcService::spawn(controller, peer_rx, &bus);
        Fixture {
            service,
            factory,
            bus,
            signal_rx,
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn candidate(n: u32) -> String {
        encode_payload(&IceCandidate::new(format!("candidate:{} 1 udp 1 10.0.0.{} 9 typ host", n, n))).unwrap()
    }

    #[tokio::test]
    async fn test_bus_driven_negotiation() {
        let mut f = fixture();
        let sink = RecordingSink::default();

        f.bus.publish(SystemEvent::MediaStreamInitialized {
            stunturn: String::new(),
        });
        let offer = encode_payload(&SessionDescription::offer("v=0\r\n")).unwrap();
        f.bus.publish(SystemEvent::MediaStreamSdpAvailable {
            sdp: offer,
            sink: SinkHandle::new(sink.clone()),
        });
        for data in [candidate(1), candidate(2), String::new()] {
            f.bus.publish(SystemEvent::MediaStreamCandidateAdd { candidate: data });
        }

        let factory = f.factory.clone();
        eventually(|| factory.created() == 1 && factory.applied_candidates(0).len() == 2).await;
        assert_eq!(
            f.factory.applied_candidates(0),
            vec![
                "candidate:1 1 udp 1 10.0.0.1 9 typ host".to_string(),
                "candidate:2 1 udp 1 10.0.0.2 9 typ host".to_string(),
            ]
        );
        assert_eq!(sink.streams.lock().len(), 1);

        assert_eq!(
            f.signal_rx.recv().await,
            Some(SignalingMessage::InitWebRtc { is_mobile: false })
        );
        assert!(matches!(f.signal_rx.recv().await, Some(SignalingMessage::Answer(_))));

        f.service.shutdown().await;
    }

    #[tokio::test]
    async fn test_input_requires_open_channel() {
        let f = fixture();
        assert!(!f.service.input(Bytes::from_static(b"early")));

        f.bus.publish(SystemEvent::MediaStreamInitialized {
            stunturn: "none".into(),
        });
        let factory = f.factory.clone();
        eventually(|| factory.created() == 1).await;

        f.factory
            .emitter(0)
            .emit(PeerEvent::DataChannelOpen { label: "input".into() });
        let service = &f.service;
        eventually(|| service.is_input_ready()).await;

        assert!(f.service.input(Bytes::from_static(b"key")));
        eventually(|| factory.calls(0).contains(&PeerCall::Send(Bytes::from_static(b"key")))).await;
        assert!(!f.service.is_connected());

        f.service.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_session() {
        let f = fixture();
        f.bus.publish(SystemEvent::MediaStreamInitialized {
            stunturn: "none".into(),
        });
        let factory = f.factory.clone();
        eventually(|| factory.created() == 1).await;

        f.service.shutdown().await;
        assert_eq!(f.factory.calls(0).last(), Some(&PeerCall::Close));
        assert_eq!(f.service.status().generation, 1);
        assert!(!f.service.is_input_ready());
    }
}
