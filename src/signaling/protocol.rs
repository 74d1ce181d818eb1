//! Named-event signaling protocol types
//!
//! Every signaling text message is a JSON envelope `{"event": <name>,
//! "data": <payload>}`. Signal payloads (offer/answer/candidate) travel
//! opaquely through the coordinator and are only parsed at the peer
//! transport edge.

use crate::config::{IceConfig, TransportKind};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Raw signaling envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Event name
    pub event: String,

    /// Event payload (absent for bare events)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Setup handshake payload sent after the channel connects
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetupRequest {
    /// Prefer unreliable delivery on the peer path
    pub udp: bool,

    /// Selected transport variant
    pub protocol: TransportKind,

    /// Account identifier
    pub account: String,

    /// Room identifier
    pub room: String,

    /// Participant identifier
    pub participant: String,
}

/// Client-to-server signaling messages
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Authenticate the participant into a room
    Setup(SetupRequest),

    /// Opaque transport negotiation payload
    Signal(serde_json::Value),

    /// Toggle the server-side microphone path
    SetMicEnable(bool),

    /// Toggle the server-side speaker path
    SetSpkrEnable(bool),
}

impl ClientMessage {
    /// Event name on the wire
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::Setup(_) => "setup",
            ClientMessage::Signal(_) => "signal",
            ClientMessage::SetMicEnable(_) => "setMicEnable",
            ClientMessage::SetSpkrEnable(_) => "setSpkrEnable",
        }
    }

    /// Serialize to an envelope JSON string
    pub fn to_json(&self) -> Result<String> {
        let data = match self {
            ClientMessage::Setup(setup) => serde_json::to_value(setup),
            ClientMessage::Signal(value) => Ok(value.clone()),
            ClientMessage::SetMicEnable(enable) => serde_json::to_value(enable),
            ClientMessage::SetSpkrEnable(enable) => serde_json::to_value(enable),
        }
        .map_err(|e| Error::Serialization(format!("Failed to serialize message data: {}", e)))?;

        let envelope = Envelope {
            event: self.event_name().to_string(),
            data: Some(data),
        };
        serde_json::to_string(&envelope)
            .map_err(|e| Error::Serialization(format!("Failed to serialize envelope: {}", e)))
    }

    /// Parse from an envelope JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(json)
            .map_err(|e| Error::Serialization(format!("Failed to parse envelope: {}", e)))?;
        let data = envelope.data.unwrap_or(serde_json::Value::Null);

        match envelope.event.as_str() {
            "setup" => {
                let setup = serde_json::from_value(data).map_err(|e| {
                    Error::Serialization(format!("Invalid setup payload: {}", e))
                })?;
                Ok(ClientMessage::Setup(setup))
            }
            "signal" => Ok(ClientMessage::Signal(data)),
            "setMicEnable" => {
                let enable = serde_json::from_value(data).map_err(|e| {
                    Error::Serialization(format!("Invalid setMicEnable payload: {}", e))
                })?;
                Ok(ClientMessage::SetMicEnable(enable))
            }
            "setSpkrEnable" => {
                let enable = serde_json::from_value(data).map_err(|e| {
                    Error::Serialization(format!("Invalid setSpkrEnable payload: {}", e))
                })?;
                Ok(ClientMessage::SetSpkrEnable(enable))
            }
            other => Err(Error::Serialization(format!(
                "Unknown client event: {}",
                other
            ))),
        }
    }
}

/// Server-to-client signaling messages
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Setup accepted; optional ICE configuration for the peer path
    Ready(Option<IceConfig>),

    /// Opaque transport negotiation payload
    Signal(serde_json::Value),
}

impl ServerMessage {
    /// Event name on the wire
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::Ready(_) => "ready",
            ServerMessage::Signal(_) => "signal",
        }
    }

    /// Serialize to an envelope JSON string
    pub fn to_json(&self) -> Result<String> {
        let data = match self {
            ServerMessage::Ready(None) => None,
            ServerMessage::Ready(Some(ice)) => Some(
                serde_json::to_value(ice).map_err(|e| {
                    Error::Serialization(format!("Failed to serialize ICE config: {}", e))
                })?,
            ),
            ServerMessage::Signal(value) => Some(value.clone()),
        };

        let envelope = Envelope {
            event: self.event_name().to_string(),
            data,
        };
        serde_json::to_string(&envelope)
            .map_err(|e| Error::Serialization(format!("Failed to serialize envelope: {}", e)))
    }

    /// Parse from an envelope JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(json)
            .map_err(|e| Error::Serialization(format!("Failed to parse envelope: {}", e)))?;

        match envelope.event.as_str() {
            "ready" => match envelope.data {
                None | Some(serde_json::Value::Null) => Ok(ServerMessage::Ready(None)),
                Some(value) => {
                    let ice = serde_json::from_value(value).map_err(|e| {
                        Error::Serialization(format!("Invalid ICE configuration: {}", e))
                    })?;
                    Ok(ServerMessage::Ready(Some(ice)))
                }
            },
            "signal" => Ok(ServerMessage::Signal(
                envelope.data.unwrap_or(serde_json::Value::Null),
            )),
            other => Err(Error::Serialization(format!(
                "Unknown server event: {}",
                other
            ))),
        }
    }
}

/// Typed peer negotiation payloads carried inside `signal` events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalMessage {
    /// Local session description proposal
    Offer {
        /// SDP text
        sdp: String,
    },

    /// Remote session description acceptance
    Answer {
        /// SDP text
        sdp: String,
    },

    /// ICE candidate proposal
    Candidate {
        /// SDP media line index
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<u16>,

        /// SDP media stream identification
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,

        /// Candidate string
        candidate: String,
    },
}

impl SignalMessage {
    /// Serialize into the opaque signal payload
    pub fn to_value(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize signal: {}", e)))
    }

    /// Parse from an opaque signal payload
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| Error::Serialization(format!("Invalid signal payload: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_round_trip() {
        let msg = ClientMessage::Setup(SetupRequest {
            udp: false,
            protocol: TransportKind::Peer,
            account: "000-account".to_string(),
            room: "000-room".to_string(),
            participant: "000-participant".to_string(),
        });

        let json = msg.to_json().unwrap();
        assert!(json.contains("\"event\":\"setup\""));
        assert!(json.contains("\"protocol\":\"peer\""));
        assert_eq!(ClientMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_mic_enable_round_trip() {
        let msg = ClientMessage::SetMicEnable(true);
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"event\":\"setMicEnable\""));
        assert_eq!(ClientMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_ready_without_data() {
        let msg = ServerMessage::from_json(r#"{"event":"ready"}"#).unwrap();
        assert_eq!(msg, ServerMessage::Ready(None));
    }

    #[test]
    fn test_ready_with_ice_config() {
        let json = r#"{"event":"ready","data":{"iceServers":[{"urls":["stun:stun.example.com"]}]}}"#;
        match ServerMessage::from_json(json).unwrap() {
            ServerMessage::Ready(Some(ice)) => {
                assert_eq!(ice.ice_servers[0].urls[0], "stun:stun.example.com");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_fails() {
        assert!(ServerMessage::from_json(r#"{"event":"nonsense"}"#).is_err());
        assert!(ClientMessage::from_json(r#"{"event":"nonsense"}"#).is_err());
    }

    #[test]
    fn test_signal_passes_through_opaque() {
        let payload = serde_json::json!({"type": "offer", "sdp": "v=0"});
        let msg = ClientMessage::Signal(payload.clone());
        let parsed = ClientMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(parsed, ClientMessage::Signal(payload));
    }

    #[test]
    fn test_signal_message_candidate_wire_shape() {
        let msg = SignalMessage::Candidate {
            label: Some(0),
            id: Some("audio".to_string()),
            candidate: "candidate:1 1 udp 2130706431 192.0.2.1 54400 typ host".to_string(),
        };

        let value = msg.to_value().unwrap();
        assert_eq!(value["type"], "candidate");
        assert_eq!(value["label"], 0);
        assert_eq!(SignalMessage::from_value(value).unwrap(), msg);
    }

    #[test]
    fn test_signal_message_offer_answer() {
        let offer = SignalMessage::Offer { sdp: "v=0".to_string() };
        let value = offer.to_value().unwrap();
        assert_eq!(value["type"], "offer");

        let answer = SignalMessage::from_value(serde_json::json!({
            "type": "answer",
            "sdp": "v=0"
        }))
        .unwrap();
        assert_eq!(answer, SignalMessage::Answer { sdp: "v=0".to_string() });
    }
}
