//! Local microphone capture and remote audio playback lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::audio_io::{
    CaptureConstraints, MediaDevices, MediaStream, PlayActivation, PlaybackSink,
    RemoteAudioTrack, SinkStatus, UserGesture,
};
use crate::diagnostics::AudioDiagnostics;
use crate::error::{MediaError, PlaybackError};
use crate::observer::{ObserverRegistry, Subscription};

#[derive(Default)]
struct Slots {
    stream: Option<MediaStream>,
    sink: Option<Arc<dyn PlaybackSink>>,
}

/// Owns the capture stream and the playback sink for one orchestrator.
///
/// Clones share state.
#[derive(Clone)]
pub struct MediaEndpoint {
    devices: Arc<dyn MediaDevices>,
    slots: Arc<Mutex<Slots>>,
    playback_started: Arc<AtomicBool>,
    autoplay_blocked: Arc<AtomicBool>,
    on_autoplay_blocked: ObserverRegistry<()>,
}

impl MediaEndpoint {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            slots: Arc::new(Mutex::new(Slots::default())),
            playback_started: Arc::new(AtomicBool::new(false)),
            autoplay_blocked: Arc::new(AtomicBool::new(false)),
            on_autoplay_blocked: ObserverRegistry::new("media.autoplay_blocked"),
        }
    }

    /// Open the microphone with echo cancellation, noise suppression and
    /// auto gain at 24 kHz mono. Returns the existing stream while it is live.
    pub async fn acquire_microphone(&self) -> Result<MediaStream, MediaError> {
        if let Some(existing) = self.local_stream() {
            if existing.is_active() {
                tracing::debug!(stream = %existing.id, "Reusing live microphone stream");
                return Ok(existing);
            }
        }

        let constraints = CaptureConstraints::default();
        let stream = match self.devices.open_microphone(&constraints).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(category = e.category(), error = %e, "Microphone acquisition failed");
                return Err(e);
            }
        };

        if stream.tracks.is_empty() {
            tracing::error!(stream = %stream.id, "Microphone stream has no audio tracks");
            return Err(MediaError::NoDevice);
        }

        tracing::info!(
            stream = %stream.id,
            tracks = stream.tracks.len(),
            sample_rate = constraints.sample_rate,
            "Microphone acquired"
        );

        if let Ok(mut slots) = self.slots.lock() {
            slots.stream = Some(stream.clone());
        }
        Ok(stream)
    }

    /// Allocate the playback sink if none exists.
    pub fn create_sink(&self) -> Result<(), MediaError> {
        if self.sink().is_some() {
            return Ok(());
        }
        let sink = self.devices.create_sink()?;
        if let Ok(mut slots) = self.slots.lock() {
            slots.sink = Some(sink);
        }
        tracing::debug!("Playback sink created");
        Ok(())
    }

    /// Bind a remote track to the sink and try to start playback.
    ///
    /// A host autoplay refusal marks the endpoint blocked and notifies
    /// `on_autoplay_blocked` subscribers; nothing is retried automatically.
    pub fn attach_remote_track(&self, track: RemoteAudioTrack) {
        if let Err(e) = self.create_sink() {
            tracing::error!(error = %e, "Cannot attach remote audio without a sink");
            return;
        }
        let Some(sink) = self.sink() else {
            return;
        };

        tracing::info!(track = track.id(), "Attaching remote audio track");
        sink.attach(track);

        match sink.play(PlayActivation::Automatic) {
            Ok(()) => {
                self.playback_started.store(true, Ordering::SeqCst);
                self.autoplay_blocked.store(false, Ordering::SeqCst);
                tracing::info!("Remote audio playback started");
            }
            Err(PlaybackError::NotAllowed) => {
                self.playback_started.store(false, Ordering::SeqCst);
                self.autoplay_blocked.store(true, Ordering::SeqCst);
                tracing::warn!("Autoplay blocked; waiting for a user gesture");
                self.on_autoplay_blocked.emit(&());
            }
            Err(e) => {
                tracing::error!(error = %e, "Remote audio playback failed");
            }
        }
    }

    /// Retry playback from a user gesture. No-op when already playing.
    pub fn resume_playback_after_user_gesture(
        &self,
        gesture: UserGesture,
    ) -> Result<(), PlaybackError> {
        if self.playback_started.load(Ordering::SeqCst) && !self.sink_status().paused {
            return Ok(());
        }
        let sink = self.sink().ok_or(PlaybackError::NoSource)?;

        sink.play(PlayActivation::UserGesture(gesture))?;
        self.playback_started.store(true, Ordering::SeqCst);
        self.autoplay_blocked.store(false, Ordering::SeqCst);
        tracing::info!("Playback resumed after user gesture");
        Ok(())
    }

    /// At least one capture track is live and enabled.
    pub fn verify_input_active(&self) -> bool {
        self.local_stream()
            .is_some_and(|stream| stream.has_active_input())
    }

    /// Stop capture, drop the sink and reset flags. Idempotent.
    pub fn dispose(&self) {
        let (stream, sink) = match self.slots.lock() {
            Ok(mut slots) => (slots.stream.take(), slots.sink.take()),
            Err(_) => (None, None),
        };

        if let Some(stream) = stream {
            stream.stop_all();
            tracing::debug!(stream = %stream.id, "Microphone released");
        }
        if let Some(sink) = sink {
            sink.pause();
            sink.detach();
        }
        self.playback_started.store(false, Ordering::SeqCst);
        self.autoplay_blocked.store(false, Ordering::SeqCst);
    }

    pub fn on_autoplay_blocked<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_autoplay_blocked.subscribe(move |()| handler())
    }

    pub fn is_autoplay_blocked(&self) -> bool {
        self.autoplay_blocked.load(Ordering::SeqCst)
    }

    pub fn local_stream(&self) -> Option<MediaStream> {
        self.slots.lock().ok().and_then(|slots| slots.stream.clone())
    }

    fn sink(&self) -> Option<Arc<dyn PlaybackSink>> {
        self.slots.lock().ok().and_then(|slots| slots.sink.clone())
    }

    fn sink_status(&self) -> SinkStatus {
        self.sink().map(|s| s.status()).unwrap_or_default()
    }

    /// Snapshot of playback state.
    pub fn audio_diagnostics(&self) -> AudioDiagnostics {
        let sink = self.sink();
        let status = sink.as_ref().map(|s| s.status()).unwrap_or_default();
        AudioDiagnostics {
            has_element: sink.is_some(),
            playback_started: self.playback_started.load(Ordering::SeqCst),
            autoplay_blocked: self.is_autoplay_blocked(),
            volume: status.volume,
            muted: status.muted,
            ready_state: status.ready_state,
            network_state: status.network_state,
            paused: status.paused,
            has_stream: status.has_stream,
            stream_active: status.stream_active,
            track_count: status.track_count,
        }
    }
}

impl std::fmt::Debug for MediaEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaEndpoint")
            .field("playback_started", &self.playback_started.load(Ordering::SeqCst))
            .field("autoplay_blocked", &self.is_autoplay_blocked())
            .finish_non_exhaustive()
    }
}
