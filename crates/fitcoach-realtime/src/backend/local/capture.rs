//! Microphone capture via `cpal` on a dedicated thread.
//!
//! `cpal::Stream` is `!Send` on some platforms, so each capture track owns an
//! OS thread that builds the stream, keeps it alive, and drops it when the
//! track is stopped. Device audio is downmixed to mono, resampled to the
//! requested rate and cut into 20 ms PCM16 frames.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use rubato::{FftFixedIn, Resampler as _};
use tokio::sync::{broadcast, oneshot};

use crate::audio_io::{AudioFrame, CaptureConstraints, CaptureTrack};
use crate::error::MediaError;
use crate::gate::EchoGate;

const RESAMPLE_CHUNK: usize = 1024;
const FRAME_BROADCAST_CAPACITY: usize = 64;

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

/// A live cpal capture track.
pub struct CpalCaptureTrack {
    id: String,
    live: Arc<AtomicBool>,
    enabled: Arc<AtomicBool>,
    frames: broadcast::Sender<AudioFrame>,
    stop_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl CpalCaptureTrack {
    /// Open the default input device and start capturing.
    pub async fn open(constraints: CaptureConstraints, gate: EchoGate) -> Result<Self, MediaError> {
        let id = format!("mic-{}", NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed));
        let live = Arc::new(AtomicBool::new(false));
        let enabled = Arc::new(AtomicBool::new(true));
        let (frames, _) = broadcast::channel(FRAME_BROADCAST_CAPACITY);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(), MediaError>>();

        let ctx = CaptureContext {
            constraints,
            gate,
            live: Arc::clone(&live),
            enabled: Arc::clone(&enabled),
            frames: frames.clone(),
        };

        thread::Builder::new()
            .name(format!("fitcoach-{id}"))
            .spawn(move || run_capture(ctx, &stop_rx, ready_tx))
            .map_err(|e| MediaError::Unknown(format!("failed to spawn capture thread: {e}")))?;

        ready_rx
            .await
            .map_err(|_| MediaError::Unknown("capture thread exited during startup".into()))??;

        Ok(Self {
            id,
            live,
            enabled,
            frames,
            stop_tx: Mutex::new(Some(stop_tx)),
        })
    }
}

impl CaptureTrack for CpalCaptureTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn stop(&self) {
        let stop = self.stop_tx.lock().ok().and_then(|mut tx| tx.take());
        if let Some(tx) = stop {
            let _ = tx.send(());
            self.live.store(false, Ordering::SeqCst);
            tracing::debug!(track = %self.id, "Capture track stopped");
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<AudioFrame> {
        self.frames.subscribe()
    }
}

impl Drop for CpalCaptureTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

struct CaptureContext {
    constraints: CaptureConstraints,
    gate: EchoGate,
    live: Arc<AtomicBool>,
    enabled: Arc<AtomicBool>,
    frames: broadcast::Sender<AudioFrame>,
}

fn run_capture(
    ctx: CaptureContext,
    stop_rx: &mpsc::Receiver<()>,
    ready_tx: oneshot::Sender<Result<(), MediaError>>,
) {
    let live = Arc::clone(&ctx.live);
    let stream = match build_stream(ctx) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(MediaError::DeviceBusy(e.to_string())));
        return;
    }

    live.store(true, Ordering::SeqCst);
    let _ = ready_tx.send(Ok(()));

    // Blocks until stop() or the track is dropped.
    let _ = stop_rx.recv();
    drop(stream);
    live.store(false, Ordering::SeqCst);
}

fn build_stream(ctx: CaptureContext) -> Result<Stream, MediaError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(MediaError::NoDevice)?;
    let config = device
        .default_input_config()
        .map_err(|e| MediaError::DeviceBusy(e.to_string()))?;

    let device_rate = config.sample_rate().0;
    let device_channels = config.channels();
    tracing::info!(
        device = %device.name().unwrap_or_default(),
        sample_rate = device_rate,
        channels = device_channels,
        target_rate = ctx.constraints.sample_rate,
        "Opening microphone"
    );

    let assembler = FrameAssembler::new(device_rate, ctx.constraints.sample_rate)?;
    let sink = FrameSink {
        assembler,
        channels: device_channels,
        gate: ctx.gate,
        enabled: ctx.enabled,
        frames: ctx.frames,
        echo_cancellation: ctx.constraints.echo_cancellation,
    };

    build_input_stream(&device, &config, sink)
}

/// Per-stream state moved into the cpal data callback.
struct FrameSink {
    assembler: FrameAssembler,
    channels: u16,
    gate: EchoGate,
    enabled: Arc<AtomicBool>,
    frames: broadcast::Sender<AudioFrame>,
    echo_cancellation: bool,
}

impl FrameSink {
    fn push(&mut self, interleaved: &[f32]) {
        let mono = downmix(interleaved, self.channels);
        for mut samples in self.assembler.push(&mono) {
            if !self.enabled.load(Ordering::Relaxed) {
                continue;
            }
            if self.echo_cancellation {
                self.gate.apply(&mut samples);
            }
            // No receivers is fine; frames are dropped until the transport subscribes.
            let _ = self
                .frames
                .send(AudioFrame::mono(samples, self.assembler.target_rate));
        }
    }
}

fn build_input_stream(
    device: &Device,
    config: &cpal::SupportedStreamConfig,
    mut sink: FrameSink,
) -> Result<Stream, MediaError> {
    let stream_config: StreamConfig = config.clone().into();
    let sample_format = config.sample_format();
    let err_fn = |err: cpal::StreamError| {
        tracing::error!(%err, "Microphone stream error");
    };

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| sink.push(data),
            err_fn,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let converted: Vec<f32> = data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                sink.push(&converted);
            },
            err_fn,
            None,
        ),
        SampleFormat::I32 => device.build_input_stream(
            &stream_config,
            move |data: &[i32], _: &cpal::InputCallbackInfo| {
                #[allow(clippy::cast_precision_loss)]
                let converted: Vec<f32> =
                    data.iter().map(|&s| s as f32 / 2_147_483_648.0).collect();
                sink.push(&converted);
            },
            err_fn,
            None,
        ),
        other => {
            return Err(MediaError::Constraint(format!(
                "unsupported sample format {other:?}"
            )));
        }
    };

    stream.map_err(map_build_error)
}

fn map_build_error(err: cpal::BuildStreamError) -> MediaError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            MediaError::DeviceBusy("input device not available".into())
        }
        cpal::BuildStreamError::StreamConfigNotSupported
        | cpal::BuildStreamError::InvalidArgument => {
            MediaError::Constraint("device does not support the requested configuration".into())
        }
        cpal::BuildStreamError::BackendSpecific { err } => {
            let lower = err.description.to_lowercase();
            if lower.contains("permission") || lower.contains("denied") {
                MediaError::PermissionDenied
            } else {
                MediaError::Unknown(err.description)
            }
        }
        other => MediaError::Unknown(other.to_string()),
    }
}

/// Average interleaved channels into one.
fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = usize::from(channels);
    #[allow(clippy::cast_precision_loss)]
    let scale = 1.0 / channels as f32;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect()
}

/// Resamples mono f32 input and emits fixed 20 ms PCM16 frames.
struct FrameAssembler {
    resampler: Option<FftFixedIn<f32>>,
    target_rate: u32,
    frame_len: usize,
    input: Vec<f32>,
    output: Vec<f32>,
}

impl FrameAssembler {
    fn new(source_rate: u32, target_rate: u32) -> Result<Self, MediaError> {
        let resampler = if source_rate == target_rate {
            None
        } else {
            Some(
                FftFixedIn::<f32>::new(
                    source_rate as usize,
                    target_rate as usize,
                    RESAMPLE_CHUNK,
                    2,
                    1,
                )
                .map_err(|e| MediaError::Constraint(format!("cannot resample: {e}")))?,
            )
        };

        Ok(Self {
            resampler,
            target_rate,
            frame_len: (target_rate / 50) as usize,
            input: Vec::new(),
            output: Vec::new(),
        })
    }

    fn push(&mut self, mono: &[f32]) -> Vec<Vec<i16>> {
        match self.resampler.as_mut() {
            None => self.output.extend_from_slice(mono),
            Some(resampler) => {
                self.input.extend_from_slice(mono);
                while self.input.len() >= RESAMPLE_CHUNK {
                    let chunk: Vec<f32> = self.input.drain(..RESAMPLE_CHUNK).collect();
                    match resampler.process(&[chunk.as_slice()], None) {
                        Ok(result) => {
                            if let Some(channel) = result.first() {
                                self.output.extend_from_slice(channel);
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "Resampling failed; dropping chunk"),
                    }
                }
            }
        }

        let mut frames = Vec::new();
        while self.output.len() >= self.frame_len {
            frames.push(
                self.output
                    .drain(..self.frame_len)
                    .map(f32_to_i16)
                    .collect(),
            );
        }
        frames
    }
}

#[allow(clippy::cast_possible_truncation)]
fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}
