//! Top-level voice session state machine.
//!
//! [`SessionOrchestrator`] owns the [`VoiceState`], drives the start and stop
//! sequences, and maps inbound protocol events to state transitions and
//! [`SessionEvent`] notifications.
//!
//! ```text
//! Idle ──start──▶ Connecting ──ready──▶ Listening ⇄ Processing ⇄ Speaking
//!   ▲                 │                      │
//!   └──────stop───────┴──────── any ─────────┴──▶ Error ──start──▶ Connecting
//! ```
//!
//! Inbound handlers hold a `Weak` reference to the orchestrator state and a
//! session generation number. They never take the lifecycle lock, so a
//! handler firing during `start_session` or `stop_session` cannot deadlock,
//! and events from a torn-down session are ignored. A fatal error on a live
//! session is released by a spawned task that does take the lock.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::audio_io::{MediaDevices, UserGesture};
use crate::channel::ControlChannel;
use crate::config::{RealtimeSettings, SessionConfig};
use crate::controller::SessionController;
use crate::diagnostics::{
    AudioDiagnostics, ConnectionDiagnostics, HealthMonitor, HealthReport, HealthWarning,
};
use crate::error::{MediaError, PeerError, PlaybackError, SessionError};
use crate::media::MediaEndpoint;
use crate::negotiation::SessionNegotiator;
use crate::observer::{ObserverRegistry, Subscription};
use crate::peer::{OfferParams, PeerConnection};
use crate::prompts::CoachMode;
use crate::protocol::{ServerEvent, compose_instructions};
use crate::transport::{PeerState, PeerTransportFactory};

/// Public session state. Exactly one value at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceState {
    #[default]
    Idle,
    Connecting,
    Listening,
    Processing,
    Speaking,
    Error,
}

impl VoiceState {
    /// Connecting or connected; `start_session` is a no-op in these states.
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Listening | Self::Processing | Self::Speaking
        )
    }

    /// Connected and able to take turns.
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Listening | Self::Processing | Self::Speaking)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for VoiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    User,
    Assistant,
}

/// Notifications delivered to [`SessionOrchestrator::subscribe`] handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged { from: VoiceState, to: VoiceState },
    /// A transcript delta (`is_final == false`) or a completed transcript.
    Transcript {
        role: TranscriptRole,
        text: String,
        is_final: bool,
    },
    /// User-facing error message.
    Error(String),
    /// Remote audio is waiting for [`SessionOrchestrator::enable_audio`].
    AutoplayBlocked,
    HealthWarning(HealthWarning),
}

/// Resources of one session attempt, torn down together.
#[derive(Default)]
struct SessionParts {
    peer: Option<Arc<PeerConnection>>,
    channel: Option<Arc<ControlChannel>>,
    controller: Option<Arc<SessionController>>,
    health: Option<HealthMonitor>,
    subscriptions: Vec<Subscription>,
}

impl SessionParts {
    async fn teardown(mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        if let Some(mut health) = self.health.take() {
            health.stop();
        }
        if let Some(controller) = self.controller.take() {
            controller.reset();
        }
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
        if let Some(peer) = self.peer.take() {
            peer.close().await;
        }
    }
}

struct ActiveSession {
    mode: CoachMode,
    generation: u64,
    parts: SessionParts,
}

/// Cancellation and failure signals of one start attempt.
#[derive(Clone, Default)]
struct Attempt {
    /// Fired by `stop_session`.
    cancel: CancellationToken,
    /// Fired by a fatal transport or server error while connecting.
    abort: CancellationToken,
    failure: Arc<Mutex<Option<SessionError>>>,
}

impl Attempt {
    fn abort_with(&self, err: SessionError) {
        if let Ok(mut failure) = self.failure.lock() {
            failure.get_or_insert(err);
        }
        self.abort.cancel();
    }

    fn failure(&self) -> SessionError {
        self.failure
            .lock()
            .ok()
            .and_then(|f| f.clone())
            .unwrap_or(SessionError::Peer(PeerError::Failed(PeerState::Failed)))
    }

    fn check(&self) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        if self.abort.is_cancelled() {
            return Err(self.failure());
        }
        Ok(())
    }

    /// Run `fut` unless the attempt is cancelled or aborted first.
    async fn guard<T, E, F>(&self, fut: F) -> Result<T, SessionError>
    where
        F: Future<Output = Result<T, E>>,
        E: Into<SessionError>,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(SessionError::Cancelled),
            () = self.abort.cancelled() => Err(self.failure()),
            result = fut => result.map_err(Into::into),
        }
    }
}

/// Handles readable without the lifecycle lock (diagnostics, turns).
#[derive(Default, Clone)]
struct LiveHandles {
    peer: Option<Arc<PeerConnection>>,
    channel: Option<Arc<ControlChannel>>,
    controller: Option<Arc<SessionController>>,
}

struct Inner {
    settings: RealtimeSettings,
    factory: Arc<dyn PeerTransportFactory>,
    negotiator: Arc<dyn SessionNegotiator>,
    media: MediaEndpoint,
    state: watch::Sender<VoiceState>,
    lifecycle: tokio::sync::Mutex<Option<ActiveSession>>,
    live: Mutex<LiveHandles>,
    /// Set while `start_session` is establishing a session.
    attempt: Mutex<Option<Attempt>>,
    last_error: Mutex<Option<SessionError>>,
    user_name: Mutex<Option<String>>,
    events: ObserverRegistry<SessionEvent>,
    generation: AtomicU64,
    response_in_flight: AtomicBool,
    audio_started: AtomicBool,
}

/// The voice session state machine. Clones share one session.
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<Inner>,
}

impl SessionOrchestrator {
    pub fn new(
        settings: RealtimeSettings,
        factory: Arc<dyn PeerTransportFactory>,
        negotiator: Arc<dyn SessionNegotiator>,
        devices: Arc<dyn MediaDevices>,
    ) -> Self {
        let (state, _) = watch::channel(VoiceState::Idle);
        let inner = Arc::new(Inner {
            settings,
            factory,
            negotiator,
            media: MediaEndpoint::new(devices),
            state,
            lifecycle: tokio::sync::Mutex::new(None),
            live: Mutex::new(LiveHandles::default()),
            attempt: Mutex::new(None),
            last_error: Mutex::new(None),
            user_name: Mutex::new(None),
            events: ObserverRegistry::new("session.events"),
            generation: AtomicU64::new(0),
            response_in_flight: AtomicBool::new(false),
            audio_started: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        let _autoplay = inner.media.on_autoplay_blocked(move || {
            if let Some(inner) = weak.upgrade() {
                inner.events.emit(&SessionEvent::AutoplayBlocked);
            }
        });

        Self { inner }
    }

    /// Start a session in `mode`.
    ///
    /// A no-op while a session is connecting or connected; waits for a stop
    /// still in progress. On failure all partial resources are released, the
    /// state becomes `Error` and the classified error is returned (and kept in
    /// [`last_error`](Self::last_error)). A transport failure or server error
    /// at any point before `Listening` aborts the start.
    pub async fn start_session(
        &self,
        mode: CoachMode,
        config: SessionConfig,
    ) -> Result<(), SessionError> {
        let inner = &self.inner;
        if inner.state().is_active() {
            tracing::debug!(state = %inner.state(), "Session already active; ignoring start");
            return Ok(());
        }
        // A stop or a failed-session release may hold the slot; wait for it.
        let mut slot = inner.lifecycle.lock().await;
        if inner.state().is_active() {
            tracing::debug!(state = %inner.state(), "Session started meanwhile; ignoring start");
            return Ok(());
        }

        if let Some(previous) = slot.take() {
            previous.parts.teardown().await;
        }
        inner.media.dispose();
        inner.clear_live();

        if let Err(e) = inner.settings.validate() {
            return Err(inner.fail(e.into()));
        }
        if let Err(e) = inner.factory.check_available() {
            return Err(inner.fail(e.into()));
        }

        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let attempt = Attempt::default();
        if let Ok(mut current) = inner.attempt.lock() {
            *current = Some(attempt.clone());
        }
        if let Ok(mut last) = inner.last_error.lock() {
            *last = None;
        }
        inner.reset_turn();
        inner.transition(|s| matches!(s, VoiceState::Idle | VoiceState::Error), VoiceState::Connecting);
        tracing::info!(mode = %mode, model = %config.model, voice = %config.voice, "Starting voice session");

        let mut parts = SessionParts::default();
        let outcome = self
            .establish(generation, &attempt, mode, &config, &mut parts)
            .await;

        // Errors reported after this point take the live-session path.
        if let Ok(mut current) = inner.attempt.lock() {
            *current = None;
        }
        let cancelled = attempt.cancel.is_cancelled()
            || inner.generation.load(Ordering::SeqCst) != generation;

        if cancelled {
            parts.teardown().await;
            inner.media.dispose();
            inner.clear_live();
            tracing::info!("Voice session start cancelled");
            return Err(SessionError::Cancelled);
        }

        match outcome.and_then(|()| attempt.check()) {
            Ok(()) => {
                *slot = Some(ActiveSession {
                    mode,
                    generation,
                    parts,
                });
                if inner.state() == VoiceState::Error {
                    // Failed right after the attempt closed; the release task tears it down.
                    return Err(inner.last_error().unwrap_or_else(|| attempt.failure()));
                }
                tracing::info!(mode = %mode, state = %inner.state(), "Voice session ready");
                Ok(())
            }
            Err(err) => {
                parts.teardown().await;
                inner.media.dispose();
                inner.clear_live();
                Err(inner.fail(err))
            }
        }
    }

    async fn establish(
        &self,
        generation: u64,
        attempt: &Attempt,
        mode: CoachMode,
        config: &SessionConfig,
        parts: &mut SessionParts,
    ) -> Result<(), SessionError> {
        let inner = &self.inner;
        let timeouts = inner.settings.timeouts;
        let user_name = inner.user_name();

        let stream = attempt.guard(inner.media.acquire_microphone()).await?;
        inner.media.create_sink()?;

        let peer = Arc::new(attempt.guard(PeerConnection::create(inner.factory.as_ref())).await?);
        parts.peer = Some(Arc::clone(&peer));
        inner.update_live(|live| live.peer = Some(Arc::clone(&peer)));

        let media = inner.media.clone();
        parts
            .subscriptions
            .push(peer.on_remote_track(move |track| media.attach_remote_track(track.clone())));

        let weak = Arc::downgrade(inner);
        parts.subscriptions.push(peer.on_error(move |err| {
            if let Some(inner) = weak.upgrade() {
                inner.fatal(generation, SessionError::Peer(err.clone()));
            }
        }));
        parts.subscriptions.push(peer.on_disconnect(|state| {
            if state == PeerState::Disconnected {
                tracing::warn!("Peer connection interrupted; waiting for recovery");
            }
        }));

        attempt.guard(peer.add_local_stream(&stream)).await?;

        let channel = Arc::new(attempt.guard(ControlChannel::create(&peer)).await?);
        parts.channel = Some(Arc::clone(&channel));
        let controller = Arc::new(SessionController::new(Arc::clone(&channel), timeouts.config_ack));
        parts.controller = Some(Arc::clone(&controller));
        inner.update_live(|live| {
            live.channel = Some(Arc::clone(&channel));
            live.controller = Some(Arc::clone(&controller));
        });

        let weak = Arc::downgrade(inner);
        let observer = Arc::clone(&controller);
        parts.subscriptions.push(channel.subscribe(move |event| {
            observer.observe_inbound(event);
            if let Some(inner) = weak.upgrade() {
                inner.on_server_event(generation, event);
            }
        }));

        let system_prompt = mode.system_prompt(user_name.as_deref());
        let params = OfferParams {
            model: config.model.clone(),
            voice: config.voice.clone(),
            instructions: compose_instructions(&system_prompt, config.instructions.as_deref()),
        };
        attempt
            .guard(peer.negotiate(inner.negotiator.as_ref(), params, timeouts.connect))
            .await?;

        attempt.guard(channel.wait_until_open(timeouts.channel_open)).await?;

        if !inner.media.verify_input_active() {
            return Err(MediaError::InputInactive.into());
        }

        parts.health = Some(inner.start_health_monitor(generation));

        let acked = attempt
            .guard(async {
                Ok::<_, SessionError>(controller.configure(&system_prompt, mode, config).await)
            })
            .await?;
        tracing::debug!(acked, "Session configuration step finished");

        let welcome = mode.welcome_text(user_name.as_deref());
        let sent = attempt
            .guard(async { Ok::<_, SessionError>(controller.send_text(&welcome).await) })
            .await?;
        if !sent {
            tracing::warn!(mode = %mode, "Welcome turn could not be sent");
        }

        attempt.check()?;
        let peer_state = peer.connection_state();
        if peer_state.is_terminal() {
            return Err(PeerError::Failed(peer_state).into());
        }

        inner.transition(|s| s == VoiceState::Connecting, VoiceState::Listening);
        Ok(())
    }

    /// Tear everything down and return to `Idle`. Safe from any state.
    ///
    /// A start in progress is cancelled and reports [`SessionError::Cancelled`].
    pub async fn stop_session(&self) {
        let inner = &self.inner;
        inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(attempt) = inner.attempt.lock().ok().and_then(|mut a| a.take()) {
            attempt.cancel.cancel();
        }

        let session = inner.lifecycle.lock().await.take();
        if let Some(session) = session {
            tracing::debug!(mode = %session.mode, "Tearing down voice session");
            session.parts.teardown().await;
        }
        inner.media.dispose();
        inner.clear_live();
        inner.reset_turn();
        inner.set_state(VoiceState::Idle);
        tracing::info!("Voice session stopped");
    }

    /// Send a typed user turn. Returns whether it went out on the channel.
    pub async fn send_text(&self, text: &str) -> Result<bool, SessionError> {
        let controller = self.live_controller()?;
        Ok(controller.send_text(text).await)
    }

    /// Ask the server to stop the current response.
    pub async fn cancel_response(&self) -> Result<bool, SessionError> {
        let controller = self.live_controller()?;
        Ok(controller.cancel_response().await)
    }

    fn live_controller(&self) -> Result<Arc<SessionController>, SessionError> {
        if !self.state().is_live() {
            return Err(SessionError::NotActive);
        }
        self.inner
            .live()
            .controller
            .ok_or(SessionError::NotActive)
    }

    /// Retry blocked playback from a user gesture.
    pub fn enable_audio(&self, gesture: UserGesture) -> Result<(), PlaybackError> {
        self.inner.media.resume_playback_after_user_gesture(gesture)
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(handler)
    }

    /// Watch state changes without a callback.
    pub fn watch_state(&self) -> watch::Receiver<VoiceState> {
        self.inner.state.subscribe()
    }

    pub fn state(&self) -> VoiceState {
        self.inner.state()
    }

    pub fn last_error(&self) -> Option<SessionError> {
        self.inner.last_error()
    }

    /// User-facing copy for the last failure.
    pub fn last_error_message(&self) -> Option<String> {
        self.last_error().map(|e| e.user_message())
    }

    /// Personalise prompts and the welcome turn of future sessions.
    pub fn set_user_name(&self, name: Option<String>) {
        if let Ok(mut slot) = self.inner.user_name.lock() {
            *slot = name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
        }
    }

    pub fn is_autoplay_blocked(&self) -> bool {
        self.inner.media.is_autoplay_blocked()
    }

    pub fn diagnostics(&self) -> ConnectionDiagnostics {
        self.inner.connection_diagnostics()
    }

    pub fn audio_diagnostics(&self) -> AudioDiagnostics {
        self.inner.media.audio_diagnostics()
    }

    /// On-demand health check.
    pub fn health_report(&self) -> HealthReport {
        self.inner.health_report()
    }

    /// Mode of the running session, if any.
    pub async fn current_mode(&self) -> Option<CoachMode> {
        self.inner.lifecycle.lock().await.as_ref().map(|s| s.mode)
    }
}

impl std::fmt::Debug for SessionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOrchestrator")
            .field("state", &self.state())
            .field("media", &self.inner.media)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn state(&self) -> VoiceState {
        *self.state.borrow()
    }

    fn set_state(&self, to: VoiceState) {
        let from = self.state.send_replace(to);
        if from != to {
            tracing::info!(from = %from, to = %to, "Voice state changed");
            self.events.emit(&SessionEvent::StateChanged { from, to });
        }
    }

    /// Move to `to` only if the current state satisfies `allowed`.
    fn transition(&self, allowed: impl Fn(VoiceState) -> bool, to: VoiceState) -> bool {
        let mut from = to;
        let changed = self.state.send_if_modified(|state| {
            if *state != to && allowed(*state) {
                from = *state;
                *state = to;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::info!(from = %from, to = %to, "Voice state changed");
            self.events.emit(&SessionEvent::StateChanged { from, to });
        }
        changed
    }

    /// Enter `Error` with `err`. The first error of a failure wins.
    fn fail(&self, err: SessionError) -> SessionError {
        let from = self.state.send_replace(VoiceState::Error);
        if from == VoiceState::Error {
            tracing::debug!(error = %err, "Additional error while already failed");
            return err;
        }

        tracing::error!(kind = ?err.kind(), error = %err, "Voice session failed");
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(err.clone());
        }
        self.events.emit(&SessionEvent::StateChanged {
            from,
            to: VoiceState::Error,
        });
        self.events.emit(&SessionEvent::Error(err.user_message()));
        err
    }

    /// Handle a fatal transport or server error for session `generation`.
    ///
    /// While a start is in progress the attempt is aborted and cleans up after
    /// itself. A live session enters `Error` and is released in the background.
    fn fatal(self: &Arc<Self>, generation: u64, err: SessionError) {
        if !self.is_current(generation) {
            return;
        }
        if let Ok(pending) = self.attempt.lock() {
            if let Some(attempt) = pending.as_ref() {
                tracing::warn!(error = %err, "Fatal error while connecting");
                attempt.abort_with(err);
                return;
            }
        }
        if self.state() == VoiceState::Error {
            tracing::debug!(error = %err, "Additional error while already failed");
            return;
        }

        self.fail(err);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let inner = Arc::clone(self);
                runtime.spawn(async move { inner.release_failed(generation).await });
            }
            Err(_) => {
                tracing::warn!("No runtime to release the failed session; stop_session will");
            }
        }
    }

    /// Tear down the failed session `generation` unless it was already
    /// stopped or replaced. The state stays `Error`.
    async fn release_failed(self: Arc<Self>, generation: u64) {
        let mut slot = self.lifecycle.lock().await;
        if !slot.as_ref().is_some_and(|s| s.generation == generation) {
            return;
        }
        if self
            .generation
            .compare_exchange(generation, generation + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        if let Some(session) = slot.take() {
            session.parts.teardown().await;
        }
        self.media.dispose();
        self.clear_live();
        self.reset_turn();
        tracing::info!("Failed voice session released");
    }

    fn last_error(&self) -> Option<SessionError> {
        self.last_error.lock().ok().and_then(|e| e.clone())
    }

    fn user_name(&self) -> Option<String> {
        self.user_name.lock().ok().and_then(|n| n.clone())
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn reset_turn(&self) {
        self.response_in_flight.store(false, Ordering::SeqCst);
        self.audio_started.store(false, Ordering::SeqCst);
    }

    fn live(&self) -> LiveHandles {
        self.live.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn update_live(&self, f: impl FnOnce(&mut LiveHandles)) {
        if let Ok(mut live) = self.live.lock() {
            f(&mut live);
        }
    }

    fn clear_live(&self) {
        self.update_live(|live| *live = LiveHandles::default());
    }

    fn connection_diagnostics(&self) -> ConnectionDiagnostics {
        let live = self.live();
        ConnectionDiagnostics::collect(live.peer.as_deref(), live.channel.as_deref(), &self.media)
    }

    fn health_report(&self) -> HealthReport {
        let last_speech = self.live().controller.and_then(|c| c.last_speech_at());
        HealthReport::evaluate(
            self.connection_diagnostics(),
            self.media.audio_diagnostics(),
            last_speech,
            self.settings.timeouts.speech_stale_after,
            Utc::now(),
        )
    }

    fn start_health_monitor(self: &Arc<Self>, generation: u64) -> HealthMonitor {
        let probe = Arc::downgrade(self);
        let notify: Weak<Self> = Arc::downgrade(self);
        HealthMonitor::start(
            self.settings.timeouts.health_interval,
            move || {
                let inner = probe.upgrade()?;
                inner.is_current(generation).then(|| inner.health_report())
            },
            move |warning| {
                if let Some(inner) = notify.upgrade() {
                    inner.events.emit(&SessionEvent::HealthWarning(warning.clone()));
                }
            },
        )
    }

    fn transcript(&self, role: TranscriptRole, text: &str, is_final: bool) {
        self.events.emit(&SessionEvent::Transcript {
            role,
            text: text.to_string(),
            is_final,
        });
    }

    fn on_server_event(self: &Arc<Self>, generation: u64, event: &ServerEvent) {
        if !self.is_current(generation) {
            return;
        }

        match event {
            ServerEvent::SpeechStarted { .. } => {
                self.transition(|s| s == VoiceState::Listening, VoiceState::Processing);
            }
            ServerEvent::ResponseCreated { .. } => {
                self.response_in_flight.store(true, Ordering::SeqCst);
                self.audio_started.store(false, Ordering::SeqCst);
                self.transition(
                    |s| !matches!(s, VoiceState::Error | VoiceState::Idle),
                    VoiceState::Processing,
                );
            }
            ServerEvent::ResponseAudioDelta { .. } | ServerEvent::OutputAudioStarted { .. } => {
                if !self.audio_started.swap(true, Ordering::SeqCst) {
                    self.transition(
                        |s| matches!(s, VoiceState::Listening | VoiceState::Processing),
                        VoiceState::Speaking,
                    );
                }
            }
            ServerEvent::ResponseAudioDone { .. } | ServerEvent::OutputAudioStopped { .. } => {
                self.audio_started.store(false, Ordering::SeqCst);
                let next = if self.response_in_flight.load(Ordering::SeqCst) {
                    VoiceState::Processing
                } else {
                    VoiceState::Listening
                };
                self.transition(|s| s == VoiceState::Speaking, next);
            }
            ServerEvent::ResponseDone { .. } => {
                self.response_in_flight.store(false, Ordering::SeqCst);
                self.transition(
                    |s| matches!(s, VoiceState::Processing | VoiceState::Speaking),
                    VoiceState::Listening,
                );
            }
            ServerEvent::InputTranscriptDelta { delta, .. } => {
                self.transcript(TranscriptRole::User, delta, false);
            }
            ServerEvent::InputTranscriptCompleted { transcript, .. } => {
                self.transcript(TranscriptRole::User, transcript, true);
            }
            ServerEvent::InputTranscriptFailed { error, .. } => {
                let reason = error.as_ref().map_or("unknown", |e| e.message.as_str());
                tracing::warn!(reason, "User speech transcription failed");
            }
            ServerEvent::ResponseTranscriptDelta { delta, .. }
            | ServerEvent::ResponseTextDelta { delta, .. } => {
                self.transcript(TranscriptRole::Assistant, delta, false);
            }
            ServerEvent::ResponseTranscriptDone { transcript: text, .. }
            | ServerEvent::ResponseTextDone { text, .. } => {
                self.transcript(TranscriptRole::Assistant, text, true);
            }
            ServerEvent::Error { error } => {
                let message = if error.message.is_empty() {
                    error.code.clone().unwrap_or_else(|| "Unknown server error".to_string())
                } else {
                    error.message.clone()
                };
                self.fatal(generation, SessionError::Server(message));
            }
            ServerEvent::RateLimitsUpdated { rate_limits } => {
                for limit in rate_limits {
                    tracing::debug!(name = %limit.name, remaining = ?limit.remaining, "Rate limit update");
                }
            }
            ServerEvent::SessionCreated { .. }
            | ServerEvent::SessionUpdated { .. }
            | ServerEvent::SpeechStopped { .. }
            | ServerEvent::InputAudioCommitted { .. }
            | ServerEvent::ConversationItemCreated { .. }
            | ServerEvent::Unknown { .. } => {}
        }
    }
}
