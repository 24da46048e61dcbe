//! Remote audio playback via `rodio`.
//!
//! `rodio::OutputStream` is `!Send`, so it lives on its own thread for the
//! lifetime of the sink; the `Send` stream handle and `Sink` are used from
//! here. A pump thread moves decoded remote frames into the sink and drives
//! the echo gate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use tokio::sync::mpsc::error::TryRecvError;

use crate::audio_io::{
    PlayActivation, PlaybackSink, RemoteAudioTrack, SinkNetworkState, SinkReadyState, SinkStatus,
};
use crate::error::{MediaError, PlaybackError};
use crate::gate::EchoGate;

const PUMP_IDLE: Duration = Duration::from_millis(10);

/// How the sink treats playback that was not started by a user gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoplayPolicy {
    /// Automatic playback is always permitted.
    #[default]
    Allowed,
    /// Automatic playback is refused until one gesture-initiated play succeeds.
    RequireGesture,
}

/// Owns the output stream thread; dropping this releases the device.
struct OutputThread {
    _shutdown: mpsc::Sender<()>,
}

fn spawn_output() -> Result<(OutputStreamHandle, OutputThread), MediaError> {
    let (handle_tx, handle_rx) = mpsc::channel::<Result<OutputStreamHandle, MediaError>>();
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    thread::Builder::new()
        .name("fitcoach-playback".into())
        .spawn(move || match OutputStream::try_default() {
            Ok((stream, handle)) => {
                let _ = handle_tx.send(Ok(handle));
                // Returns once the OutputThread is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
            }
            Err(e) => {
                let _ = handle_tx.send(Err(MediaError::OutputUnavailable(e.to_string())));
            }
        })
        .map_err(|e| MediaError::OutputUnavailable(format!("failed to spawn playback thread: {e}")))?;

    let handle = handle_rx
        .recv()
        .map_err(|_| MediaError::OutputUnavailable("playback thread exited".into()))??;

    Ok((
        handle,
        OutputThread {
            _shutdown: shutdown_tx,
        },
    ))
}

#[derive(Default)]
struct SinkSlots {
    track: Option<RemoteAudioTrack>,
    sink: Option<Arc<Sink>>,
    pump_stop: Option<Arc<AtomicBool>>,
}

/// [`PlaybackSink`] on the default output device.
pub struct RodioSink {
    handle: OutputStreamHandle,
    _output: OutputThread,
    policy: AutoplayPolicy,
    gesture_seen: AtomicBool,
    gate: EchoGate,
    slots: Mutex<SinkSlots>,
    pump_running: Arc<AtomicBool>,
}

impl RodioSink {
    pub fn open(policy: AutoplayPolicy, gate: EchoGate) -> Result<Self, MediaError> {
        let (handle, output) = spawn_output()?;
        tracing::info!(policy = ?policy, "Playback sink opened on default output device");
        Ok(Self {
            handle,
            _output: output,
            policy,
            gesture_seen: AtomicBool::new(false),
            gate,
            slots: Mutex::new(SinkSlots::default()),
            pump_running: Arc::new(AtomicBool::new(false)),
        })
    }

    fn start_pump(&self, slots: &mut SinkSlots) -> Result<(), PlaybackError> {
        let track = slots.track.as_ref().ok_or(PlaybackError::NoSource)?;
        let mut frames = track.take_frames().ok_or(PlaybackError::NoSource)?;

        let sink = Arc::new(
            Sink::try_new(&self.handle).map_err(|e| PlaybackError::Device(e.to_string()))?,
        );
        let stop = Arc::new(AtomicBool::new(false));
        let running = Arc::clone(&self.pump_running);
        let gate = self.gate.clone();
        let pump_sink = Arc::clone(&sink);
        let pump_stop = Arc::clone(&stop);
        let track_id = track.id().to_string();

        running.store(true, Ordering::SeqCst);
        let spawned = thread::Builder::new()
            .name("fitcoach-playback-pump".into())
            .spawn(move || {
                while !pump_stop.load(Ordering::SeqCst) {
                    match frames.try_recv() {
                        Ok(frame) => {
                            gate.close();
                            pump_sink.append(SamplesBuffer::new(
                                frame.channels,
                                frame.sample_rate,
                                frame.samples,
                            ));
                        }
                        Err(TryRecvError::Empty) => {
                            if pump_sink.empty() {
                                gate.open();
                            }
                            thread::sleep(PUMP_IDLE);
                        }
                        Err(TryRecvError::Disconnected) => break,
                    }
                }
                gate.open();
                running.store(false, Ordering::SeqCst);
                tracing::debug!(track = %track_id, "Playback pump finished");
            });

        if let Err(e) = spawned {
            self.pump_running.store(false, Ordering::SeqCst);
            return Err(PlaybackError::Device(format!("failed to spawn pump: {e}")));
        }

        slots.sink = Some(sink);
        slots.pump_stop = Some(stop);
        Ok(())
    }

    fn stop_pump(&self, slots: &mut SinkSlots) {
        if let Some(stop) = slots.pump_stop.take() {
            stop.store(true, Ordering::SeqCst);
        }
        if let Some(sink) = slots.sink.take() {
            sink.stop();
        }
        self.gate.open();
    }
}

impl PlaybackSink for RodioSink {
    fn attach(&self, track: RemoteAudioTrack) {
        if let Ok(mut slots) = self.slots.lock() {
            self.stop_pump(&mut slots);
            slots.track = Some(track);
        }
    }

    fn play(&self, activation: PlayActivation) -> Result<(), PlaybackError> {
        match activation {
            PlayActivation::UserGesture(_) => self.gesture_seen.store(true, Ordering::SeqCst),
            PlayActivation::Automatic => {
                if self.policy == AutoplayPolicy::RequireGesture
                    && !self.gesture_seen.load(Ordering::SeqCst)
                {
                    return Err(PlaybackError::NotAllowed);
                }
            }
        }

        let mut slots = self
            .slots
            .lock()
            .map_err(|_| PlaybackError::Device("sink state poisoned".into()))?;
        if let Some(sink) = slots.sink.as_ref() {
            sink.play();
            return Ok(());
        }
        self.start_pump(&mut slots)
    }

    fn pause(&self) {
        if let Ok(slots) = self.slots.lock() {
            if let Some(sink) = slots.sink.as_ref() {
                sink.pause();
            }
        }
    }

    fn detach(&self) {
        if let Ok(mut slots) = self.slots.lock() {
            self.stop_pump(&mut slots);
            slots.track = None;
        }
    }

    fn status(&self) -> SinkStatus {
        let Ok(slots) = self.slots.lock() else {
            return SinkStatus::default();
        };
        let has_stream = slots.track.is_some();
        let pumping = self.pump_running.load(Ordering::SeqCst);

        let (volume, paused, queued) = slots.sink.as_ref().map_or((1.0, true, 0), |sink| {
            (sink.volume(), sink.is_paused(), sink.len())
        });

        SinkStatus {
            volume,
            muted: volume <= 0.0,
            paused,
            ready_state: match (slots.sink.is_some(), queued) {
                (false, _) => SinkReadyState::Empty,
                (true, 0) => SinkReadyState::Buffering,
                (true, _) => SinkReadyState::Ready,
            },
            network_state: match (has_stream, pumping) {
                (false, _) => SinkNetworkState::NoSource,
                (true, true) => SinkNetworkState::Loading,
                (true, false) => SinkNetworkState::Idle,
            },
            has_stream,
            stream_active: has_stream && pumping,
            track_count: usize::from(has_stream),
        }
    }
}

impl Drop for RodioSink {
    fn drop(&mut self) {
        if let Ok(mut slots) = self.slots.lock() {
            self.stop_pump(&mut slots);
        }
    }
}
