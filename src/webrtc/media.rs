//! Inbound media plumbing
//!
//! The controller owns one `MediaStream` per negotiation session and adds
//! every track the primitive delivers. The stream is handed to the
//! application's `MediaSink` once the answer is in place; tracks that arrive
//! later show up through `MediaStream::watch`.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};
use webrtc::track::track_remote::TrackRemote;

/// Track media kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
    Unknown,
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackKind::Audio => write!(f, "audio"),
            TrackKind::Video => write!(f, "video"),
            TrackKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// A track received from the remote peer
#[derive(Clone)]
pub struct InboundTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
    /// Underlying RTP source (absent for test doubles)
    pub remote: Option<Arc<TrackRemote>>,
}

impl InboundTrack {
    pub fn new(id: impl Into<String>, stream_id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            stream_id: stream_id.into(),
            kind,
            remote: None,
        }
    }
}

impl std::fmt::Debug for InboundTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .field("has_remote", &self.remote.is_some())
            .finish()
    }
}

/// Collection of inbound tracks for one negotiation session
#[derive(Clone)]
pub struct MediaStream {
    id: String,
    tracks: Arc<watch::Sender<Vec<InboundTrack>>>,
}

impl MediaStream {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Vec::new());
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tracks: Arc::new(tx),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Add a track, notifying watchers
    pub fn add_track(&self, track: InboundTrack) {
        self.tracks.send_modify(|tracks| tracks.push(track));
    }

    /// Snapshot of the current tracks
    pub fn tracks(&self) -> Vec<InboundTrack> {
        self.tracks.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.tracks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to track list changes
    pub fn watch(&self) -> watch::Receiver<Vec<InboundTrack>> {
        self.tracks.subscribe()
    }
}

impl Default for MediaStream {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field("tracks", &self.len())
            .finish()
    }
}

/// Destination for inbound media (a video element in a browser client)
pub trait MediaSink: Send + Sync {
    fn attach(&self, stream: MediaStream);
}

/// Cloneable, debuggable handle to a sink, carried on the event bus
#[derive(Clone)]
pub struct SinkHandle(Arc<dyn MediaSink>);

impl SinkHandle {
    pub fn new<S: MediaSink + 'static>(sink: S) -> Self {
        Self(Arc::new(sink))
    }

    pub fn attach(&self, stream: MediaStream) {
        self.0.attach(stream)
    }
}

impl std::fmt::Debug for SinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SinkHandle")
    }
}

/// Sink that drains inbound RTP and logs per-track packet counts
pub struct LogSink {
    report_every: u64,
}

impl LogSink {
    pub fn new(report_every: u64) -> Self {
        Self {
            report_every: report_every.max(1),
        }
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new(500)
    }
}

impl MediaSink for LogSink {
    fn attach(&self, stream: MediaStream) {
        info!("Media stream {} attached ({} tracks)", stream.id(), stream.len());

        let mut tracks_rx = stream.watch();
        let report_every = self.report_every;

        tokio::spawn(async move {
            let mut seen = 0usize;
            loop {
                let snapshot = tracks_rx.borrow_and_update().clone();
                for track in snapshot.iter().skip(seen) {
                    info!("Track {} ({}) added to stream {}", track.id, track.kind, track.stream_id);
                    if let Some(remote) = track.remote.clone() {
                        tokio::spawn(drain_track(remote, track.id.clone(), report_every));
                    }
                }
                seen = snapshot.len();

                if tracks_rx.changed().await.is_err() {
                    break;
                }
            }
        });
    }
}

async fn drain_track(remote: Arc<TrackRemote>, track_id: String, report_every: u64) {
    let mut packets: u64 = 0;
    loop {
        match remote.read_rtp().await {
            Ok(_) => {
                packets += 1;
                if packets % report_every == 0 {
                    debug!("Track {} received {} RTP packets", track_id, packets);
                }
            }
            Err(e) => {
                info!("Track {} ended after {} packets: {}", track_id, packets, e);
                break;
            }
        }
    }
}
