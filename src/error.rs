//! Error types for the audio session client

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in audio session operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Missing or invalid session configuration field
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling channel error
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// Inbound audio frame without a valid header boundary
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Offer/answer/candidate application failure
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnection(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidate(String),

    /// SDP parsing or rewrite error
    #[error("SDP error: {0}")]
    Sdp(String),

    /// Data channel error
    #[error("Data channel error: {0}")]
    DataChannel(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrack(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is fatal for the session
    ///
    /// Only configuration errors are fatal; everything else is surfaced
    /// as an event and the connection attempt continues.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Check if this error concerns peer negotiation
    pub fn is_negotiation_error(&self) -> bool {
        matches!(
            self,
            Error::Negotiation(_)
                | Error::PeerConnection(_)
                | Error::IceCandidate(_)
                | Error::Sdp(_)
                | Error::DataChannel(_)
                | Error::MediaTrack(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("no account provided".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid configuration: no account provided"
        );
    }

    #[test]
    fn test_error_is_fatal() {
        assert!(Error::InvalidConfig("test".to_string()).is_fatal());
        assert!(!Error::Signaling("test".to_string()).is_fatal());
        assert!(!Error::MalformedFrame("test".to_string()).is_fatal());
    }

    #[test]
    fn test_error_is_negotiation_error() {
        assert!(Error::Negotiation("test".to_string()).is_negotiation_error());
        assert!(Error::Sdp("test".to_string()).is_negotiation_error());
        assert!(!Error::Signaling("test".to_string()).is_negotiation_error());
    }
}
