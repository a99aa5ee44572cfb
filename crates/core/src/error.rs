//! Error types for the peer session orchestrator

/// Result type alias using the orchestrator Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while orchestrating peer sessions
///
/// None of these are fatal to the process: the orchestrator records them in
/// the snapshot's `error` field and keeps serving unrelated peers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Relay could not be reached or the handshake failed
    #[error("SignalR Error: {0}")]
    SignalingUnavailable(String),

    /// Link is up but `GetConnectionId` failed
    #[error("Failed to get ID: {0}")]
    IdentityRetrievalFailed(String),

    /// Transport engine reported a failed session with the given remote
    #[error("Connection failed with {0}")]
    TransportFailed(String),

    /// Local capture denied or no device present
    #[error("Media unavailable: {0}")]
    MediaUnavailable(String),

    /// Undecodable data-channel payload
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Operation needs a connected signaling link and a known identity
    #[error("Not ready: {0}")]
    NotReady(String),

    /// Session actor has already terminated
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// Registry refused a new session
    #[error("Peer limit reached ({0} sessions)")]
    PeerLimitReached(u32),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Data channel error
    #[error("Data channel error: {0}")]
    DataChannelError(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// Transport engine error not tied to a specific negotiation step
    #[error("Transport error: {0}")]
    TransportError(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SignalingUnavailable(_)
                | Error::IdentityRetrievalFailed(_)
                | Error::WebSocketError(_)
                | Error::IoError(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("test".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: test");

        let err = Error::TransportFailed("peer-b".to_string());
        assert_eq!(err.to_string(), "Connection failed with peer-b");

        let err = Error::IdentityRetrievalFailed("timeout".to_string());
        assert_eq!(err.to_string(), "Failed to get ID: timeout");
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(Error::SignalingUnavailable("test".to_string()).is_retryable());
        assert!(Error::WebSocketError("test".to_string()).is_retryable());
        assert!(!Error::InvalidConfig("test".to_string()).is_retryable());
        assert!(!Error::TransportFailed("peer".to_string()).is_retryable());
        assert!(!Error::SerializationError("bad handshake".to_string()).is_retryable());
    }

    #[test]
    fn test_error_is_config_error() {
        assert!(Error::InvalidConfig("test".to_string()).is_config_error());
        assert!(!Error::SdpError("test".to_string()).is_config_error());
    }

    #[test]
    fn test_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::SerializationError(_)));
    }
}
