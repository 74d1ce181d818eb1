//! Media transport variants
//!
//! The transport is selected once from the session configuration and
//! never swapped afterwards. Both variants report the same event set to
//! the coordinator, which republishes them outward.

mod relay;
pub use relay::RelayTransport;

mod peer;
pub use peer::PeerTransport;

use crate::config::TransportKind;
use bytes::Bytes;
use std::sync::Arc;
use webrtc::track::track_local::TrackLocal;

/// Local media handed to the peer transport
pub type MediaSource = Arc<dyn TrackLocal + Send + Sync>;

/// Events reported by a media transport to the coordinator
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Transport instantiated and accepting work
    Ready,
    /// Audio path established
    Connected,
    /// Audio path lost
    Disconnected,
    /// Decoded inbound audio samples
    Audio(Vec<i16>),
    /// Negotiation response timer elapsed (attempt continues)
    ConnectionTimeout(String),
    /// Negotiation failed (terminal for this attempt)
    ConnectionFailure(String),
    /// Outbound negotiation payload for the signaling channel
    Signal(serde_json::Value),
}

/// The active media transport, selected at setup time
pub enum MediaTransport {
    /// Server-relayed framed audio
    Relay(RelayTransport),
    /// Directly negotiated peer connection
    Peer(PeerTransport),
}

impl MediaTransport {
    /// Which variant is active
    pub fn kind(&self) -> TransportKind {
        match self {
            MediaTransport::Relay(_) => TransportKind::Relay,
            MediaTransport::Peer(_) => TransportKind::Peer,
        }
    }

    /// Forward an encoded audio frame
    pub fn send_frame(&self, frame: Bytes) {
        match self {
            MediaTransport::Relay(relay) => relay.send_frame(frame),
            MediaTransport::Peer(peer) => peer.send_frame(frame),
        }
    }

    /// Forward an inbound negotiation payload (peer only)
    pub fn handle_signal(&self, value: serde_json::Value) {
        match self {
            MediaTransport::Relay(_) => {}
            MediaTransport::Peer(peer) => peer.handle_signal(value),
        }
    }

    /// Forward an inbound binary frame from the relay data path
    pub fn handle_binary(&self, data: Bytes) {
        match self {
            MediaTransport::Relay(relay) => relay.handle_binary(data),
            MediaTransport::Peer(_) => {}
        }
    }

    /// Attach or swap the local media source (peer only)
    pub fn set_media_source(&self, source: MediaSource) {
        match self {
            MediaTransport::Relay(_) => {}
            MediaTransport::Peer(peer) => peer.set_media_source(source),
        }
    }

    /// Release the transport
    pub fn close(&self) {
        match self {
            MediaTransport::Relay(relay) => relay.close(),
            MediaTransport::Peer(peer) => peer.close(),
        }
    }
}
