//! Peer transport ports.
//!
//! These traits decouple [`PeerConnection`](crate::peer::PeerConnection) and
//! [`ControlChannel`](crate::channel::ControlChannel) from a concrete
//! transport stack:
//!
//! | Implementor | Where used |
//! |---|---|
//! | [`WebRtcTransportFactory`](crate::backend::webrtc::WebRtcTransportFactory) | Native hosts, `webrtc` feature |
//! | in-memory fakes | Integration tests |
//!
//! All traits are object-safe. Event delivery is push-based: the adapter
//! calls the installed handler from whatever thread its stack uses, so
//! handlers must be cheap and must not block.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::audio_io::{CaptureTrack, RemoteAudioTrack};
use crate::error::TransportError;

/// Aggregate connectivity state of the peer transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerState {
    /// `failed` and `closed` never recover without a new transport.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }

    /// States that notify "disconnected" listeners.
    pub const fn is_disconnect(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

/// ICE agent state, reported for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceState {
    #[default]
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Ready state of a data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    #[default]
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Notifications pushed by a [`PeerTransport`].
#[derive(Debug, Clone)]
pub enum TransportEvent {
    PeerStateChanged(PeerState),
    IceStateChanged(IceState),
    /// The remote side added an audio track.
    RemoteTrack(RemoteAudioTrack),
}

/// Notifications pushed by a [`DataChannelTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Closed,
    Error(String),
    /// One complete UTF-8 text frame.
    Message(String),
}

pub type TransportEventHandler = Arc<dyn Fn(TransportEvent) + Send + Sync>;
pub type ChannelEventHandler = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

/// Allocates fresh transports; one per session attempt.
#[async_trait]
pub trait PeerTransportFactory: Send + Sync {
    /// Whether this runtime can build peer transports at all. Called before
    /// any device is opened; `Unavailable` means no session can start.
    fn check_available(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn create(&self) -> Result<Arc<dyn PeerTransport>, TransportError>;
}

/// A single offer/answer peer transport.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Install the event handler, replacing any previous one.
    fn set_event_handler(&self, handler: TransportEventHandler);

    /// Send frames from a local capture track to the remote side.
    async fn add_local_track(&self, track: Arc<dyn CaptureTrack>) -> Result<(), TransportError>;

    /// Create a reliable, ordered data channel.
    async fn create_data_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannelTransport>, TransportError>;

    /// Produce a local offer SDP.
    async fn create_offer(&self) -> Result<String, TransportError>;

    /// Apply the local offer and return the description to send to the remote
    /// side (adapters that gather candidates up front return the completed SDP).
    async fn set_local_description(&self, offer_sdp: &str) -> Result<String, TransportError>;

    /// Apply the remote answer SDP.
    async fn set_remote_answer(&self, answer_sdp: &str) -> Result<(), TransportError>;

    fn connection_state(&self) -> PeerState;

    fn ice_state(&self) -> IceState;

    /// Tear down the transport. Must be safe to call more than once.
    async fn close(&self);
}

/// A text data channel on a [`PeerTransport`].
#[async_trait]
pub trait DataChannelTransport: Send + Sync {
    fn label(&self) -> String;

    fn ready_state(&self) -> ChannelState;

    /// Install the event handler, replacing any previous one.
    fn set_event_handler(&self, handler: ChannelEventHandler);

    async fn send_text(&self, text: String) -> Result<(), TransportError>;

    async fn close(&self);
}
