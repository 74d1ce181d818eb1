//! Session configuration types

use serde::{Deserialize, Serialize};

/// Transport selected for the audio path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Server-relayed binary audio over the signaling data path
    Relay,
    /// Directly negotiated WebRTC peer connection (default)
    Peer,
}

impl TransportKind {
    /// Wire name used in the setup handshake `protocol` field
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Relay => "relay",
            TransportKind::Peer => "peer",
        }
    }
}

impl Default for TransportKind {
    fn default() -> Self {
        TransportKind::Peer
    }
}

/// Immutable session parameters for one client instance
///
/// All fields except `transport` and `use_udp` are mandatory and
/// validated before the signaling channel is opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// WebSocket signaling server URL (ws:// or wss://)
    pub signaling_url: String,

    /// Account identifier
    pub account: String,

    /// Room identifier
    pub room: String,

    /// Participant identifier
    pub participant: String,

    /// Audio sample rate in Hz
    pub sample_rate: u32,

    /// Transport variant for the audio path (default: peer)
    #[serde(default)]
    pub transport: TransportKind,

    /// Prefer unreliable delivery on the peer path (default: false)
    #[serde(default)]
    pub use_udp: bool,
}

impl SessionConfig {
    /// Create a configuration with the mandatory fields
    pub fn new(
        signaling_url: impl Into<String>,
        account: impl Into<String>,
        room: impl Into<String>,
        participant: impl Into<String>,
        sample_rate: u32,
    ) -> Self {
        Self {
            signaling_url: signaling_url.into(),
            account: account.into(),
            room: room.into(),
            participant: participant.into(),
            sample_rate,
            transport: TransportKind::default(),
            use_udp: false,
        }
    }

    /// Select the transport variant
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Set the unreliable-delivery hint for the peer path
    pub fn with_udp(mut self, use_udp: bool) -> Self {
        self.use_udp = use_udp;
        self
    }

    /// Validate that every required field is present
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` naming the first missing field.
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.signaling_url.is_empty() {
            return Err(Error::InvalidConfig(
                "no signaling URL provided".to_string(),
            ));
        }
        if self.account.is_empty() {
            return Err(Error::InvalidConfig("no account provided".to_string()));
        }
        if self.room.is_empty() {
            return Err(Error::InvalidConfig("no room provided".to_string()));
        }
        if self.participant.is_empty() {
            return Err(Error::InvalidConfig(
                "no participant provided".to_string(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(Error::InvalidConfig(
                "no sample rate provided".to_string(),
            ));
        }

        Ok(())
    }
}

/// ICE configuration carried by the `ready` signaling event
///
/// Absent configuration falls back to a public STUN server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceConfig {
    /// STUN/TURN servers for candidate gathering
    #[serde(rename = "iceServers")]
    pub ice_servers: Vec<IceServerConfig>,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServerConfig {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: None,
                credential: None,
            }],
        }
    }
}

/// A single STUN/TURN server entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// Server URLs (stun:, turn: or turns:)
    pub urls: Vec<String>,

    /// Username for TURN authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Credential for TURN authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}
