//! Audio capture and playback ports.
//!
//! [`MediaEndpoint`](crate::media::MediaEndpoint) talks to the host audio
//! stack only through these traits:
//!
//! | Implementor | Where used |
//! |---|---|
//! | [`LocalMediaDevices`](crate::backend::local::LocalMediaDevices) | Desktop / CLI: cpal capture + rodio playback |
//! | in-memory fakes | Integration tests |
//!
//! All methods take `&self`; implementations use channels and atomics for
//! interior state so the traits stay object-safe.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use crate::error::{MediaError, PlaybackError};

/// Sample rate used by the realtime session for PCM16 audio.
pub const SESSION_SAMPLE_RATE: u32 = 24_000;

/// Samples per 20 ms mono frame at [`SESSION_SAMPLE_RATE`].
pub const FRAME_SAMPLES: usize = 480;

/// One chunk of interleaved PCM16 audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFrame {
    pub const fn mono(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
        }
    }
}

/// Capture parameters requested from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
            sample_rate: SESSION_SAMPLE_RATE,
            channels: 1,
        }
    }
}

/// A live local audio input.
pub trait CaptureTrack: Send + Sync {
    fn id(&self) -> String;

    /// `false` once the track has been stopped or the device went away.
    fn is_live(&self) -> bool;

    fn is_enabled(&self) -> bool;

    /// Disabled tracks keep running but deliver no frames.
    fn set_enabled(&self, enabled: bool);

    /// Stop capture permanently. Idempotent.
    fn stop(&self);

    /// Receive 20 ms frames at the constrained sample rate.
    fn subscribe(&self) -> broadcast::Receiver<AudioFrame>;
}

/// Capture tracks obtained together from one microphone request.
#[derive(Clone)]
pub struct MediaStream {
    pub id: String,
    pub tracks: Vec<Arc<dyn CaptureTrack>>,
}

impl MediaStream {
    /// At least one track is live.
    pub fn is_active(&self) -> bool {
        self.tracks.iter().any(|t| t.is_live())
    }

    /// At least one track is live and enabled.
    pub fn has_active_input(&self) -> bool {
        self.tracks.iter().any(|t| t.is_live() && t.is_enabled())
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.len())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Remote audio delivered by the transport.
///
/// Clones share the frame receiver; the first sink to attach takes it.
#[derive(Clone)]
pub struct RemoteAudioTrack {
    id: String,
    frames: Arc<Mutex<Option<mpsc::Receiver<AudioFrame>>>>,
}

impl RemoteAudioTrack {
    pub fn new(id: impl Into<String>, frames: mpsc::Receiver<AudioFrame>) -> Self {
        Self {
            id: id.into(),
            frames: Arc::new(Mutex::new(Some(frames))),
        }
    }

    /// Create a track together with the sender that feeds it.
    pub fn channel(id: impl Into<String>, capacity: usize) -> (mpsc::Sender<AudioFrame>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(id, rx))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Take the frame receiver. Returns `None` if already taken.
    pub fn take_frames(&self) -> Option<mpsc::Receiver<AudioFrame>> {
        self.frames.lock().ok().and_then(|mut slot| slot.take())
    }
}

impl std::fmt::Debug for RemoteAudioTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAudioTrack").field("id", &self.id).finish()
    }
}

/// Proof that a playback attempt originates from a direct user action.
///
/// Hosts with autoplay restrictions only start playback from a gesture;
/// construct this exclusively in input handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserGesture(());

impl UserGesture {
    pub const fn new() -> Self {
        Self(())
    }
}

impl Default for UserGesture {
    fn default() -> Self {
        Self::new()
    }
}

/// Why playback is being started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayActivation {
    Automatic,
    UserGesture(UserGesture),
}

/// Buffering state of the sink, mirroring a media element's ready state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SinkReadyState {
    #[default]
    Empty,
    Buffering,
    Ready,
}

/// Source state of the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SinkNetworkState {
    #[default]
    NoSource,
    Idle,
    Loading,
}

/// Point-in-time view of a [`PlaybackSink`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SinkStatus {
    pub volume: f32,
    pub muted: bool,
    pub paused: bool,
    pub ready_state: SinkReadyState,
    pub network_state: SinkNetworkState,
    pub has_stream: bool,
    pub stream_active: bool,
    pub track_count: usize,
}

/// The auto-play output for remote audio.
pub trait PlaybackSink: Send + Sync {
    /// Bind a remote track as the playback source, replacing any previous one.
    fn attach(&self, track: RemoteAudioTrack);

    /// Start or resume playback.
    fn play(&self, activation: PlayActivation) -> Result<(), PlaybackError>;

    fn pause(&self);

    /// Drop the source and release the output. Idempotent.
    fn detach(&self);

    fn status(&self) -> SinkStatus;
}

/// Host audio device access.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn open_microphone(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<MediaStream, MediaError>;

    fn create_sink(&self) -> Result<Arc<dyn PlaybackSink>, MediaError>;
}
