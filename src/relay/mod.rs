//! Signaling relay transport
//!
//! The app server is reached through a WebSocket relay that forwards flat
//! JSON packets in both directions.

mod client;

pub use client::RelayClient;
