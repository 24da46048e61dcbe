//! Local desktop audio: cpal microphone capture and rodio playback.
//!
//! Capture and playback share one [`EchoGate`] so microphone frames are
//! silenced while coach audio plays, which is how the `echo_cancellation`
//! constraint is honoured without a platform echo canceller.

mod capture;
mod playback;

use std::sync::Arc;

use async_trait::async_trait;

pub use capture::CpalCaptureTrack;
pub use playback::{AutoplayPolicy, RodioSink};

use crate::audio_io::{
    CaptureConstraints, CaptureTrack, MediaDevices, MediaStream, PlaybackSink,
};
use crate::error::MediaError;
use crate::gate::EchoGate;

/// [`MediaDevices`] on the default cpal input and rodio output devices.
#[derive(Debug, Clone, Default)]
pub struct LocalMediaDevices {
    gate: EchoGate,
    policy: AutoplayPolicy,
}

impl LocalMediaDevices {
    pub fn new(policy: AutoplayPolicy) -> Self {
        Self {
            gate: EchoGate::new(),
            policy,
        }
    }

    pub fn echo_gate(&self) -> &EchoGate {
        &self.gate
    }
}

#[async_trait]
impl MediaDevices for LocalMediaDevices {
    async fn open_microphone(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<MediaStream, MediaError> {
        if constraints.channels != 1 {
            return Err(MediaError::Constraint(format!(
                "only mono capture is supported, requested {} channels",
                constraints.channels
            )));
        }
        if !constraints.noise_suppression || !constraints.auto_gain_control {
            tracing::debug!("Noise suppression and gain control are left to the device driver");
        }

        let track = CpalCaptureTrack::open(*constraints, self.gate.clone()).await?;
        let id = format!("local-{}", track.id());
        let track: Arc<dyn CaptureTrack> = Arc::new(track);
        Ok(MediaStream {
            id,
            tracks: vec![track],
        })
    }

    fn create_sink(&self) -> Result<Arc<dyn PlaybackSink>, MediaError> {
        Ok(Arc::new(RodioSink::open(self.policy, self.gate.clone())?))
    }
}
