//! cloudapp-rtc - WebRTC client for remotely streamed applications
//!
//! Negotiates a peer connection with a remote app server through a signaling
//! relay, receives its audio/video and sends keyboard and pointer input back
//! over a data channel.

pub mod config;
pub mod error;
pub mod events;
pub mod input;
pub mod relay;
pub mod utils;
pub mod webrtc;

pub use error::{AppError, Result};
