//! Signaling channel and protocol types

mod channel;
pub mod protocol;

pub use channel::{ServerBound, SignalingChannel, SignalingEvent, SignalingSender, SignalingServerEnd};
pub use protocol::{ClientMessage, Envelope, ServerMessage, SetupRequest, SignalMessage};
