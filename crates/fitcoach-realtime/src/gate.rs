//! Echo gate shared by local capture and playback.
//!
//! Native hosts have no platform echo canceller in front of cpal, so the
//! local backend implements the `echo_cancellation` capture constraint by
//! muting microphone frames while coach audio is coming out of the speaker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cloneable flag: `true` while remote audio is audible.
#[derive(Debug, Clone, Default)]
pub struct EchoGate {
    playing: Arc<AtomicBool>,
}

impl EchoGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Playback produced audible output; capture should go quiet.
    pub fn close(&self) {
        if !self.playing.swap(true, Ordering::SeqCst) {
            tracing::trace!("Echo gate closed (coach audio playing)");
        }
    }

    /// Playback drained; capture may resume.
    pub fn open(&self) {
        if self.playing.swap(false, Ordering::SeqCst) {
            tracing::trace!("Echo gate open");
        }
    }

    /// Whether capture frames should currently be replaced with silence.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// Apply the gate to a captured frame in place.
    pub fn apply(&self, samples: &mut [i16]) {
        if self.is_closed() {
            samples.fill(0);
        }
    }
}
