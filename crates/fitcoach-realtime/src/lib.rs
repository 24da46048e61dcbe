#![doc = include_str!("../README.md")]
#![deny(unused_crate_dependencies)]

pub mod audio_io;
pub mod backend;
pub mod channel;
pub mod config;
pub mod controller;
pub mod diagnostics;
pub mod error;
pub mod gate;
pub mod media;
pub mod negotiation;
pub mod observer;
pub mod orchestrator;
pub mod peer;
pub mod prompts;
pub mod protocol;
pub mod transport;

// Re-export key types for convenience
pub use audio_io::{MediaDevices, PlaybackSink, UserGesture};
pub use config::{MaxTokens, RealtimeSettings, SessionConfig, SessionTimeouts};
pub use diagnostics::{AudioDiagnostics, ConnectionDiagnostics, HealthReport, HealthWarning};
pub use error::{ErrorKind, SessionError};
pub use gate::EchoGate;
pub use negotiation::{HttpNegotiator, SessionNegotiator};
pub use observer::Subscription;
pub use orchestrator::{SessionEvent, SessionOrchestrator, TranscriptRole, VoiceState};
pub use prompts::CoachMode;
pub use transport::{PeerTransport, PeerTransportFactory};
