//! Connection and audio health snapshots plus the periodic health monitor.
//!
//! Snapshots are computed from live component state on every call and never
//! cached. The monitor is observability only: it logs and reports warnings
//! but never changes session state.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::audio_io::{SinkNetworkState, SinkReadyState};
use crate::channel::ControlChannel;
use crate::media::MediaEndpoint;
use crate::peer::PeerConnection;
use crate::transport::{ChannelState, IceState, PeerState};

/// Transport, channel and capture state at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDiagnostics {
    pub is_connected: bool,
    pub session_configured: bool,
    pub audio_input_active: bool,
    pub peer_state: Option<PeerState>,
    pub ice_state: Option<IceState>,
    pub channel_state: Option<ChannelState>,
    pub local_stream_active: bool,
    pub audio_track_count: usize,
}

impl ConnectionDiagnostics {
    pub fn collect(
        peer: Option<&PeerConnection>,
        channel: Option<&ControlChannel>,
        media: &MediaEndpoint,
    ) -> Self {
        let stream = media.local_stream();
        Self {
            is_connected: peer.is_some_and(PeerConnection::is_connected),
            session_configured: channel.is_some_and(ControlChannel::is_session_configured),
            audio_input_active: media.verify_input_active(),
            peer_state: peer.map(PeerConnection::connection_state),
            ice_state: peer.map(PeerConnection::ice_state),
            channel_state: channel.map(ControlChannel::state),
            local_stream_active: stream.as_ref().is_some_and(|s| s.is_active()),
            audio_track_count: stream.map_or(0, |s| s.tracks.len()),
        }
    }
}

/// Playback sink state at one instant.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDiagnostics {
    pub has_element: bool,
    pub playback_started: bool,
    pub autoplay_blocked: bool,
    pub volume: f32,
    pub muted: bool,
    pub ready_state: SinkReadyState,
    pub network_state: SinkNetworkState,
    pub paused: bool,
    pub has_stream: bool,
    pub stream_active: bool,
    pub track_count: usize,
}

/// Inconsistencies flagged by a health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum HealthWarning {
    /// Connected, but no live and enabled capture track.
    AudioInputInactive,
    /// Connected, but the control channel is not open.
    ChannelNotOpen { state: Option<ChannelState> },
    /// No user speech detected for a long time.
    SpeechStale { idle_secs: u64 },
}

impl fmt::Display for HealthWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AudioInputInactive => f.write_str("connected but audio input is not active"),
            Self::ChannelNotOpen { state } => {
                write!(f, "connected but control channel is {state:?}")
            }
            Self::SpeechStale { idle_secs } => {
                write!(f, "no user speech detected for {idle_secs}s")
            }
        }
    }
}

/// A full health check result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub connection: ConnectionDiagnostics,
    pub audio: AudioDiagnostics,
    pub last_speech_at: Option<DateTime<Utc>>,
    pub warnings: Vec<HealthWarning>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Evaluate warnings for a snapshot taken at `now`.
    pub fn evaluate(
        connection: ConnectionDiagnostics,
        audio: AudioDiagnostics,
        last_speech_at: Option<DateTime<Utc>>,
        speech_stale_after: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let mut warnings = Vec::new();
        if connection.is_connected {
            if !connection.audio_input_active {
                warnings.push(HealthWarning::AudioInputInactive);
            }
            if connection.channel_state != Some(ChannelState::Open) {
                warnings.push(HealthWarning::ChannelNotOpen {
                    state: connection.channel_state,
                });
            }
            if let Some(last) = last_speech_at {
                let idle = (now - last).to_std().unwrap_or_default();
                if idle >= speech_stale_after {
                    warnings.push(HealthWarning::SpeechStale {
                        idle_secs: idle.as_secs(),
                    });
                }
            }
        }

        Self {
            connection,
            audio,
            last_speech_at,
            warnings,
            checked_at: now,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Background task polling a health probe on a fixed interval.
///
/// Stopping (or dropping) the monitor cancels the task.
#[derive(Debug)]
pub struct HealthMonitor {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    /// Spawn the poll loop. `probe` returns `None` when there is nothing to
    /// check; `on_warning` is called for every warning of every report.
    pub fn start<P, W>(every: Duration, probe: P, on_warning: W) -> Self
    where
        P: Fn() -> Option<HealthReport> + Send + 'static,
        W: Fn(&HealthWarning) + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;

            tracing::debug!(interval = ?every, "Health monitor started");
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(report) = probe() else {
                            continue;
                        };
                        tracing::debug!(
                            connected = report.connection.is_connected,
                            configured = report.connection.session_configured,
                            audio_input = report.connection.audio_input_active,
                            peer = ?report.connection.peer_state,
                            channel = ?report.connection.channel_state,
                            playback = report.audio.playback_started,
                            "Health check"
                        );
                        for warning in &report.warnings {
                            tracing::warn!(warning = %warning, "Voice session health warning");
                            on_warning(warning);
                        }
                    }
                }
            }
            tracing::debug!("Health monitor stopped");
        });

        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Cancel the poll loop. Idempotent.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        self.task.take();
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished()) && !self.cancel.is_cancelled()
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn connected() -> ConnectionDiagnostics {
        ConnectionDiagnostics {
            is_connected: true,
            session_configured: true,
            audio_input_active: true,
            peer_state: Some(PeerState::Connected),
            ice_state: Some(IceState::Connected),
            channel_state: Some(ChannelState::Open),
            local_stream_active: true,
            audio_track_count: 1,
        }
    }

    #[test]
    fn healthy_connected_session_has_no_warnings() {
        let report = HealthReport::evaluate(
            connected(),
            AudioDiagnostics::default(),
            None,
            Duration::from_secs(300),
            Utc::now(),
        );
        assert!(report.is_healthy());
    }

    #[test]
    fn flags_inactive_input_and_closed_channel() {
        let mut connection = connected();
        connection.audio_input_active = false;
        connection.channel_state = Some(ChannelState::Closed);

        let report = HealthReport::evaluate(
            connection,
            AudioDiagnostics::default(),
            None,
            Duration::from_secs(300),
            Utc::now(),
        );
        assert_eq!(
            report.warnings,
            vec![
                HealthWarning::AudioInputInactive,
                HealthWarning::ChannelNotOpen {
                    state: Some(ChannelState::Closed)
                }
            ]
        );
    }

    #[test]
    fn flags_stale_speech() {
        let now = Utc::now();
        let last = now - chrono::Duration::seconds(400);
        let report = HealthReport::evaluate(
            connected(),
            AudioDiagnostics::default(),
            Some(last),
            Duration::from_secs(300),
            now,
        );
        assert_eq!(
            report.warnings,
            vec![HealthWarning::SpeechStale { idle_secs: 400 }]
        );
    }

    #[test]
    fn disconnected_session_is_not_flagged() {
        let report = HealthReport::evaluate(
            ConnectionDiagnostics::default(),
            AudioDiagnostics::default(),
            None,
            Duration::from_secs(300),
            Utc::now(),
        );
        assert!(report.is_healthy());
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_polls_on_interval_until_stopped() {
        let polls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polls);
        let mut monitor = HealthMonitor::start(
            Duration::from_secs(30),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                None
            },
            |_| {},
        );

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert_eq!(polls.load(Ordering::SeqCst), 3);

        monitor.stop();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(polls.load(Ordering::SeqCst), 3);
        assert!(!monitor.is_running());
    }
}
