//! Error types for the call layer

use crate::media::TrackKind;

/// Result type alias using the call Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in call and peer operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The user refused camera or microphone access
    #[error("Permission denied for {kind} capture")]
    PermissionDenied {
        /// Device class that was refused
        kind: TrackKind,
    },

    /// Capture device could not be opened for another reason
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    /// Operation requires an active call
    #[error("Not in a call")]
    NotInCall,

    /// The call was left while joining was still acquiring devices
    #[error("Join cancelled by leave")]
    JoinCancelled,

    /// Peer not found
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// Peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// SDP negotiation error
    #[error("SDP error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Media track error
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// Signaling delivery or decoding error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// Presence or party error from the core crate
    #[error(transparent)]
    Core(#[from] watchparty_core::Error),

    /// Other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this is a capture permission denial
    ///
    /// This is the one call failure the user is told about specifically.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Error::PermissionDenied { .. })
    }

    /// Check if this error is scoped to a single peer
    ///
    /// Peer errors are logged and absorbed; they never end the call.
    pub fn is_peer_error(&self) -> bool {
        matches!(
            self,
            Error::PeerNotFound(_)
                | Error::PeerConnectionError(_)
                | Error::SdpError(_)
                | Error::IceCandidateError(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}

impl From<webrtc::Error> for Error {
    fn from(err: webrtc::Error) -> Self {
        Error::WebRtcError(err.to_string())
    }
}
