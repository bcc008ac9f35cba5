//! Per-session negotiation state

use tokio::task::JoinHandle;

use super::config::IceConfig;
use super::media::MediaStream;

/// Observable controller state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerStatus {
    /// Generation of the active session (0 before the first `start`)
    pub generation: u64,
    /// The primitive reported connectivity
    pub connected: bool,
    /// The input data channel is open
    pub input_ready: bool,
    /// A local answer has been applied
    pub remote_answered: bool,
    /// Negotiation failed; only a new `start` recovers
    pub aborted: bool,
    /// Remote candidates waiting for a flush
    pub pending_candidates: usize,
}

/// The single active negotiation attempt
pub(super) struct NegotiationSession<P> {
    pub(super) generation: u64,
    pub(super) peer: P,
    pub(super) ice: IceConfig,
    pub(super) media: MediaStream,
    pub(super) remote_answered: bool,
    pub(super) flushing: bool,
    pub(super) aborted: bool,
    pub(super) pending_candidates: Vec<String>,
    pub(super) connected: bool,
    pub(super) input_ready: bool,
    pub(super) restart_attempted: bool,
    pub(super) gathering_timer: Option<JoinHandle<()>>,
}

impl<P> NegotiationSession<P> {
    pub(super) fn new(generation: u64, peer: P, ice: IceConfig) -> Self {
        Self {
            generation,
            peer,
            ice,
            media: MediaStream::new(),
            remote_answered: false,
            flushing: false,
            aborted: false,
            pending_candidates: Vec::new(),
            connected: false,
            input_ready: false,
            restart_attempted: false,
            gathering_timer: None,
        }
    }

    pub(super) fn status(&self) -> ControllerStatus {
        ControllerStatus {
            generation: self.generation,
            connected: self.connected,
            input_ready: self.input_ready,
            remote_answered: self.remote_answered,
            aborted: self.aborted,
            pending_candidates: self.pending_candidates.len(),
        }
    }

    pub(super) fn cancel_gathering_timer(&mut self) {
        if let Some(timer) = self.gathering_timer.take() {
            timer.abort();
        }
    }
}
