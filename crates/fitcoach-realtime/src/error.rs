//! Realtime session error types.
//!
//! Each layer owns a narrow error enum; [`SessionError`] is the single type
//! surfaced by the orchestrator and carries the user-facing classification.

use std::time::Duration;

use crate::transport::PeerState;

/// Missing or invalid connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is absent or empty.
    #[error("Missing required environment variable {0}")]
    MissingEnv(&'static str),

    /// A configuration value is present but unusable.
    #[error("Invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors raised by the local audio endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    /// The host refused microphone access.
    #[error("Microphone permission denied")]
    PermissionDenied,

    /// No audio input device found.
    #[error("No audio input device found")]
    NoDevice,

    /// The device exists but could not be opened (in use, unplugged).
    #[error("Audio device is busy or unreadable: {0}")]
    DeviceBusy(String),

    /// The requested capture constraints cannot be satisfied.
    #[error("Audio constraints not satisfiable: {0}")]
    Constraint(String),

    /// Failed to open the audio output device.
    #[error("Audio output unavailable: {0}")]
    OutputUnavailable(String),

    /// Capture was acquired but no track is live and enabled.
    #[error("Audio input is not active")]
    InputInactive,

    /// Fallback when no known category matches.
    #[error("Unknown audio error: {0}")]
    Unknown(String),
}

impl MediaError {
    /// Short category label used in logs.
    pub const fn category(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::NoDevice => "no_device",
            Self::DeviceBusy(_) => "device_busy",
            Self::Constraint(_) => "constraint",
            Self::OutputUnavailable(_) => "output_unavailable",
            Self::InputInactive => "input_inactive",
            Self::Unknown(_) => "unknown",
        }
    }

    /// Whether the user can fix this by granting access or plugging in a device.
    pub const fn is_permission_related(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied | Self::NoDevice | Self::DeviceBusy(_) | Self::InputInactive
        )
    }
}

/// Errors from a playback attempt on the sink.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    /// The host policy forbids starting playback without a user gesture.
    #[error("Playback not allowed without a user gesture")]
    NotAllowed,

    /// No remote stream is attached to the sink.
    #[error("No audio stream attached to the sink")]
    NoSource,

    /// The output device failed.
    #[error("Playback device error: {0}")]
    Device(String),
}

/// Errors from the peer transport adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The transport API is not available in this host (feature disabled, init failure).
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    /// Creating or applying a session description failed.
    #[error("Session description error: {0}")]
    Sdp(String),

    /// Data channel operation failed.
    #[error("Data channel error: {0}")]
    Channel(String),

    /// Media track operation failed.
    #[error("Media track error: {0}")]
    Track(String),

    /// The transport is already closed.
    #[error("Transport closed")]
    Closed,
}

/// Errors from the offer/answer exchange with the backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationError {
    /// The request never produced an HTTP response.
    #[error("Negotiation request failed: {0}")]
    Request(String),

    /// The endpoint answered with a non-success status; body is verbatim.
    #[error("Negotiation failed with status {status}: {body}")]
    Status { status: u16, body: String },

    /// The endpoint answered 2xx with an empty body.
    #[error("Negotiation returned an empty SDP answer")]
    EmptyAnswer,
}

/// Peer connection establishment errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    /// The transport did not reach `connected` in time.
    #[error("Connection failed: not connected after {0:?}")]
    Timeout(Duration),

    /// The transport entered a terminal state while connecting.
    #[error("Connection failed: transport entered {0:?}")]
    Failed(PeerState),
}

/// Control channel errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    /// The channel did not open in time.
    #[error("Control channel did not open within {0:?}")]
    Timeout(Duration),

    /// The channel closed before it ever opened.
    #[error("Control channel closed before opening")]
    ClosedBeforeOpen,

    /// The channel reported an error while opening.
    #[error("Control channel error: {0}")]
    Failed(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Inbound frame decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame is a JSON object without a string `type` field.
    #[error("Control message has no type field")]
    MissingType,

    /// A known message type whose payload does not match its schema.
    #[error("Malformed {event_type} message: {message}")]
    Malformed { event_type: String, message: String },
}

/// Coarse classification that drives user-facing copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Permission,
    Connectivity,
    Protocol,
    Cancelled,
    NotActive,
    Other,
}

/// Errors surfaced by [`SessionOrchestrator`](crate::orchestrator::SessionOrchestrator).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The server sent a protocol `error` event.
    #[error("Server error: {0}")]
    Server(String),

    /// An operation that needs a live session was called without one.
    #[error("No active voice session")]
    NotActive,

    /// `stop_session` ran while the session was still being established.
    #[error("Voice session start was cancelled")]
    Cancelled,
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        Self::Peer(PeerError::Transport(err))
    }
}

impl SessionError {
    /// Classify the error for user-facing copy.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Media(e) if e.is_permission_related() => ErrorKind::Permission,
            Self::Media(_) => ErrorKind::Other,
            Self::Peer(PeerError::Transport(TransportError::Unavailable(_))) => {
                ErrorKind::Configuration
            }
            Self::Peer(_) | Self::Channel(_) => ErrorKind::Connectivity,
            Self::Server(_) => ErrorKind::Protocol,
            Self::NotActive => ErrorKind::NotActive,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// The single message shown to the user for this failure.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Permission => {
                "Microphone access is required for voice coaching. Allow microphone access and try again."
                    .to_string()
            }
            ErrorKind::Connectivity => {
                "Could not connect to your voice coach. Check your network connection and try again."
                    .to_string()
            }
            ErrorKind::Configuration => {
                format!("Voice coaching is not configured on this device: {self}")
            }
            ErrorKind::Protocol => match self {
                Self::Server(message) => message.clone(),
                _ => self.to_string(),
            },
            ErrorKind::Cancelled | ErrorKind::NotActive | ErrorKind::Other => {
                format!("Voice session failed: {self}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_errors_classify_as_permission() {
        let err = SessionError::from(MediaError::PermissionDenied);
        assert_eq!(err.kind(), ErrorKind::Permission);
        assert!(err.user_message().contains("Microphone access"));

        let err = SessionError::from(MediaError::NoDevice);
        assert_eq!(err.kind(), ErrorKind::Permission);
    }

    #[test]
    fn negotiation_and_timeout_classify_as_connectivity() {
        let err = SessionError::from(PeerError::Timeout(Duration::from_secs(15)));
        assert_eq!(err.kind(), ErrorKind::Connectivity);

        let err = SessionError::from(PeerError::Negotiation(NegotiationError::Status {
            status: 502,
            body: "upstream down".into(),
        }));
        assert_eq!(err.kind(), ErrorKind::Connectivity);
        assert!(err.to_string().contains("upstream down"));

        let err = SessionError::from(ChannelError::ClosedBeforeOpen);
        assert_eq!(err.kind(), ErrorKind::Connectivity);
    }

    #[test]
    fn server_error_message_is_verbatim() {
        let err = SessionError::Server("Rate limit reached".into());
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.user_message(), "Rate limit reached");
    }

    #[test]
    fn unknown_audio_error_is_generic() {
        let err = SessionError::from(MediaError::Unknown("boom".into()));
        assert_eq!(err.kind(), ErrorKind::Other);
        assert!(err.user_message().starts_with("Voice session failed"));
    }

    #[test]
    fn missing_transport_api_is_configuration() {
        let err = SessionError::from(TransportError::Unavailable("webrtc disabled".into()));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
