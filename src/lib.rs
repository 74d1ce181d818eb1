//! Real-time audio session client
//!
//! This crate establishes an audio session between a participant and a
//! room over one of two interchangeable transports: a server-relayed
//! binary channel, or a directly negotiated WebRTC peer connection.
//! Session setup runs over a WebSocket signaling channel with a
//! two-stage timeout escalation; audio travels as compact framed
//! 16-bit samples in both directions.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  AudioRouterClient (coordinator task)                │
//! │  ├─ SignalingChannel (WebSocket, setup/ready/signal) │
//! │  ├─ EscalatingTimeout (response + failure timers)    │
//! │  ├─ MediaTransport                                   │
//! │  │   ├─ RelayTransport (framed audio over channel)   │
//! │  │   └─ PeerTransport  (webrtc offer/answer/ICE,     │
//! │  │       opus-preferred SDP, audio data channel)     │
//! │  └─ MetricsAggregator (periodic traffic counters)    │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use audiolink::{SessionConfig, TransportKind};
//!
//! let config = SessionConfig::new("ws://localhost:4000", "acct", "room", "ppt", 48000)
//!     .with_transport(TransportKind::Relay);
//! assert!(config.validate().is_ok());
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use audiolink::{AudioRouterClient, ClientEvent, SessionConfig};
//!
//! # async fn example() -> audiolink::Result<()> {
//! let config = SessionConfig::new("ws://localhost:4000", "acct", "room", "ppt", 48000);
//! let mut client = AudioRouterClient::open(config)?;
//! let mut events = client.events().expect("events are taken once");
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ClientEvent::Connected => client.send_audio(&[0i16; 160])?,
//!         ClientEvent::Audio(samples) => println!("{} samples", samples.len()),
//!         ClientEvent::Closed => break,
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod packet;
pub mod sdp;
pub mod signaling;
pub mod timeout;
pub mod transport;

// Re-exports for public API
pub use client::{AudioRouterClient, ClientEvent, ConnectionState};
pub use config::{IceConfig, IceServerConfig, SessionConfig, TransportKind};
pub use error::{Error, Result};
pub use metrics::{Metrics, MetricsSnapshot};
pub use packet::{AudioFrame, AudioHeader};
pub use transport::{MediaSource, MediaTransport};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
