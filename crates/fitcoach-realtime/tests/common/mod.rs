//! In-memory fakes for the transport, negotiation and media ports.
//!
//! The fakes complete every step synchronously unless a scenario says
//! otherwise, so tests see deterministic ordering without real audio
//! hardware or network access.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fitcoach_realtime::audio_io::{
    AudioFrame, CaptureConstraints, CaptureTrack, MediaDevices, MediaStream, PlayActivation,
    PlaybackSink, RemoteAudioTrack, SinkNetworkState, SinkReadyState, SinkStatus,
};
use fitcoach_realtime::config::{RealtimeSettings, SessionConfig};
use fitcoach_realtime::error::{MediaError, NegotiationError, PlaybackError, TransportError};
use fitcoach_realtime::negotiation::{NegotiationRequest, SessionNegotiator};
use fitcoach_realtime::orchestrator::{SessionEvent, SessionOrchestrator};
use fitcoach_realtime::transport::{
    ChannelEvent, ChannelEventHandler, ChannelState, DataChannelTransport, IceState, PeerState,
    PeerTransport, PeerTransportFactory, TransportEvent, TransportEventHandler,
};
use serde_json::Value;
use tokio::sync::broadcast;

pub const FAKE_ANSWER: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=answer\r\n";

// ── Scenario ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connect {
    /// Report `connected` as soon as the answer is applied.
    OnAnswer,
    /// Stay in `connecting` forever.
    Never,
    /// Report `failed` when the answer is applied.
    Fail,
}

/// Knobs shared by all fakes of one test.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub connect: Connect,
    pub open_channel: bool,
    /// Reply to `session.update` with `session.updated`.
    pub auto_ack: bool,
    pub remote_track: bool,
    /// `close` yields once before completing, so a stop stays in progress
    /// across an await point.
    pub slow_close: bool,
    /// The factory's availability check passes.
    pub transport_available: bool,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            connect: Connect::OnAnswer,
            open_channel: true,
            auto_ack: true,
            remote_track: true,
            slow_close: false,
            transport_available: true,
        }
    }
}

// ── Transport ──────────────────────────────────────────────────────

type Slot<H> = Mutex<Option<H>>;

fn current<H: Clone>(slot: &Slot<H>) -> Option<H> {
    slot.lock().unwrap().clone()
}

pub struct FakeDataChannel {
    label: String,
    state: Mutex<ChannelState>,
    handler: Slot<ChannelEventHandler>,
    sent: Mutex<Vec<Value>>,
    auto_ack: bool,
}

impl FakeDataChannel {
    fn new(label: &str, auto_ack: bool) -> Self {
        Self {
            label: label.to_string(),
            state: Mutex::new(ChannelState::Connecting),
            handler: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            auto_ack,
        }
    }

    fn emit(&self, event: ChannelEvent) {
        if let Some(handler) = current(&self.handler) {
            handler(event);
        }
    }

    pub fn open(&self) {
        *self.state.lock().unwrap() = ChannelState::Open;
        self.emit(ChannelEvent::Open);
    }

    /// The remote side closed the channel.
    pub fn close_remote(&self) {
        *self.state.lock().unwrap() = ChannelState::Closed;
        self.emit(ChannelEvent::Closed);
    }

    pub fn fail(&self, message: &str) {
        self.emit(ChannelEvent::Error(message.to_string()));
    }

    /// Deliver one raw text frame as if it came from the server.
    pub fn push_raw(&self, frame: &str) {
        self.emit(ChannelEvent::Message(frame.to_string()));
    }

    pub fn push(&self, event: &Value) {
        self.push_raw(&event.to_string());
    }

    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter_map(|v| v["type"].as_str().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl DataChannelTransport for FakeDataChannel {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn ready_state(&self) -> ChannelState {
        *self.state.lock().unwrap()
    }

    fn set_event_handler(&self, handler: ChannelEventHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if self.ready_state() != ChannelState::Open {
            return Err(TransportError::Closed);
        }
        let value: Value = serde_json::from_str(&text).expect("client frames are JSON");
        let is_update = value["type"] == "session.update";
        self.sent.lock().unwrap().push(value);
        if is_update && self.auto_ack {
            self.push(&serde_json::json!({"type": "session.updated", "session": {}}));
        }
        Ok(())
    }

    async fn close(&self) {
        *self.state.lock().unwrap() = ChannelState::Closed;
    }
}

pub struct FakePeerTransport {
    scenario: Scenario,
    state: Mutex<PeerState>,
    handler: Slot<TransportEventHandler>,
    channel: Mutex<Option<Arc<FakeDataChannel>>>,
    local_tracks: AtomicUsize,
    pub closed: AtomicBool,
    /// Keeps the remote audio sender alive for the sink under test.
    remote_audio: Mutex<Option<tokio::sync::mpsc::Sender<AudioFrame>>>,
}

impl FakePeerTransport {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            state: Mutex::new(PeerState::New),
            handler: Mutex::new(None),
            channel: Mutex::new(None),
            local_tracks: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            remote_audio: Mutex::new(None),
        }
    }

    fn emit(&self, event: TransportEvent) {
        if let Some(handler) = current(&self.handler) {
            handler(event);
        }
    }

    pub fn set_state(&self, state: PeerState) {
        *self.state.lock().unwrap() = state;
        self.emit(TransportEvent::PeerStateChanged(state));
    }

    pub fn channel(&self) -> Arc<FakeDataChannel> {
        self.channel
            .lock()
            .unwrap()
            .clone()
            .expect("control channel was created")
    }

    pub fn local_track_count(&self) -> usize {
        self.local_tracks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerTransport for FakePeerTransport {
    fn set_event_handler(&self, handler: TransportEventHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    async fn add_local_track(&self, _track: Arc<dyn CaptureTrack>) -> Result<(), TransportError> {
        self.local_tracks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_data_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannelTransport>, TransportError> {
        let channel = Arc::new(FakeDataChannel::new(label, self.scenario.auto_ack));
        *self.channel.lock().unwrap() = Some(Arc::clone(&channel));
        Ok(channel)
    }

    async fn create_offer(&self) -> Result<String, TransportError> {
        Ok("v=0\r\ns=offer\r\n".to_string())
    }

    async fn set_local_description(&self, offer_sdp: &str) -> Result<String, TransportError> {
        self.set_state(PeerState::Connecting);
        Ok(offer_sdp.to_string())
    }

    async fn set_remote_answer(&self, _answer_sdp: &str) -> Result<(), TransportError> {
        match self.scenario.connect {
            Connect::OnAnswer => {
                self.set_state(PeerState::Connected);
                if self.scenario.remote_track {
                    let (tx, track) = RemoteAudioTrack::channel("remote-audio", 8);
                    *self.remote_audio.lock().unwrap() = Some(tx);
                    self.emit(TransportEvent::RemoteTrack(track));
                }
                if self.scenario.open_channel {
                    self.channel().open();
                }
            }
            Connect::Fail => self.set_state(PeerState::Failed),
            Connect::Never => {}
        }
        Ok(())
    }

    fn connection_state(&self) -> PeerState {
        *self.state.lock().unwrap()
    }

    fn ice_state(&self) -> IceState {
        match self.connection_state() {
            PeerState::Connected => IceState::Connected,
            PeerState::Failed => IceState::Failed,
            PeerState::Closed => IceState::Closed,
            _ => IceState::Checking,
        }
    }

    async fn close(&self) {
        if self.scenario.slow_close {
            tokio::task::yield_now().await;
        }
        self.closed.store(true, Ordering::SeqCst);
        *self.state.lock().unwrap() = PeerState::Closed;
    }
}

#[derive(Default)]
pub struct FakeTransportFactory {
    scenario: Scenario,
    created: Mutex<Vec<Arc<FakePeerTransport>>>,
}

impl FakeTransportFactory {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn created(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn last(&self) -> Arc<FakePeerTransport> {
        self.created
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("a transport was created")
    }
}

#[async_trait]
impl PeerTransportFactory for FakeTransportFactory {
    fn check_available(&self) -> Result<(), TransportError> {
        if self.scenario.transport_available {
            Ok(())
        } else {
            Err(TransportError::Unavailable(
                "peer connections are not supported".to_string(),
            ))
        }
    }

    async fn create(&self) -> Result<Arc<dyn PeerTransport>, TransportError> {
        let transport = Arc::new(FakePeerTransport::new(self.scenario.clone()));
        self.created.lock().unwrap().push(Arc::clone(&transport));
        Ok(transport)
    }
}

// ── Negotiation ────────────────────────────────────────────────────

pub enum Answer {
    Sdp(String),
    Reject(NegotiationError),
    /// Never answer; used to hold a start in progress.
    Hang,
}

pub struct FakeNegotiator {
    answer: Answer,
    requests: Mutex<Vec<NegotiationRequest>>,
}

impl FakeNegotiator {
    pub fn answering() -> Self {
        Self::with(Answer::Sdp(FAKE_ANSWER.to_string()))
    }

    pub fn with(answer: Answer) -> Self {
        Self {
            answer,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<NegotiationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionNegotiator for FakeNegotiator {
    async fn exchange(&self, request: &NegotiationRequest) -> Result<String, NegotiationError> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.answer {
            Answer::Sdp(sdp) => Ok(sdp.clone()),
            Answer::Reject(err) => Err(err.clone()),
            Answer::Hang => std::future::pending().await,
        }
    }
}

// ── Media ──────────────────────────────────────────────────────────

pub struct FakeTrack {
    live: AtomicBool,
    enabled: AtomicBool,
    frames: broadcast::Sender<AudioFrame>,
}

impl FakeTrack {
    pub fn new() -> Self {
        let (frames, _) = broadcast::channel(4);
        Self {
            live: AtomicBool::new(true),
            enabled: AtomicBool::new(true),
            frames,
        }
    }

    pub fn is_stopped(&self) -> bool {
        !self.live.load(Ordering::SeqCst)
    }
}

impl CaptureTrack for FakeTrack {
    fn id(&self) -> String {
        "fake-mic".to_string()
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
        self.live.store(false, Ordering::SeqCst);
    }

    fn subscribe(&self) -> broadcast::Receiver<AudioFrame> {
        self.frames.subscribe()
    }
}

#[derive(Default)]
pub struct FakeSink {
    block_autoplay: bool,
    track: Mutex<Option<String>>,
    playing: AtomicBool,
    pub plays: AtomicUsize,
}

impl FakeSink {
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

impl PlaybackSink for FakeSink {
    fn attach(&self, track: RemoteAudioTrack) {
        *self.track.lock().unwrap() = Some(track.id().to_string());
    }

    fn play(&self, activation: PlayActivation) -> Result<(), PlaybackError> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        if self.block_autoplay && activation == PlayActivation::Automatic {
            return Err(PlaybackError::NotAllowed);
        }
        if self.track.lock().unwrap().is_none() {
            return Err(PlaybackError::NoSource);
        }
        self.playing.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }

    fn detach(&self) {
        *self.track.lock().unwrap() = None;
    }

    fn status(&self) -> SinkStatus {
        let has_stream = self.track.lock().unwrap().is_some();
        let playing = self.is_playing();
        SinkStatus {
            volume: 1.0,
            muted: false,
            paused: !playing,
            ready_state: if playing {
                SinkReadyState::Ready
            } else {
                SinkReadyState::Empty
            },
            network_state: if has_stream {
                SinkNetworkState::Loading
            } else {
                SinkNetworkState::NoSource
            },
            has_stream,
            stream_active: has_stream && playing,
            track_count: usize::from(has_stream),
        }
    }
}

pub enum Microphone {
    Available,
    Denied,
    /// A stream without any tracks.
    Empty,
}

pub struct FakeMediaDevices {
    microphone: Microphone,
    pub sink: Arc<FakeSink>,
    opened: AtomicUsize,
    tracks: Mutex<Vec<Arc<FakeTrack>>>,
}

impl FakeMediaDevices {
    pub fn new() -> Self {
        Self::with(Microphone::Available, false)
    }

    pub fn with(microphone: Microphone, block_autoplay: bool) -> Self {
        Self {
            microphone,
            sink: Arc::new(FakeSink {
                block_autoplay,
                ..FakeSink::default()
            }),
            opened: AtomicUsize::new(0),
            tracks: Mutex::new(Vec::new()),
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// The microphone track handed out by the latest successful open.
    pub fn last_track(&self) -> Arc<FakeTrack> {
        self.tracks
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("a microphone track was opened")
    }
}

#[async_trait]
impl MediaDevices for FakeMediaDevices {
    async fn open_microphone(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<MediaStream, MediaError> {
        assert!(constraints.echo_cancellation);
        self.opened.fetch_add(1, Ordering::SeqCst);
        match self.microphone {
            Microphone::Available => {
                let track = Arc::new(FakeTrack::new());
                self.tracks.lock().unwrap().push(Arc::clone(&track));
                Ok(MediaStream {
                    id: "fake-stream".to_string(),
                    tracks: vec![track as Arc<dyn CaptureTrack>],
                })
            }
            Microphone::Denied => Err(MediaError::PermissionDenied),
            Microphone::Empty => Ok(MediaStream {
                id: "empty-stream".to_string(),
                tracks: Vec::new(),
            }),
        }
    }

    fn create_sink(&self) -> Result<Arc<dyn PlaybackSink>, MediaError> {
        Ok(Arc::clone(&self.sink) as Arc<dyn PlaybackSink>)
    }
}

// ── Harness ────────────────────────────────────────────────────────

pub struct Harness {
    pub orchestrator: SessionOrchestrator,
    pub factory: Arc<FakeTransportFactory>,
    pub negotiator: Arc<FakeNegotiator>,
    pub devices: Arc<FakeMediaDevices>,
    pub events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl Harness {
    pub fn new(scenario: Scenario) -> Self {
        Self::build(scenario, FakeNegotiator::answering(), FakeMediaDevices::new())
    }

    pub fn build(scenario: Scenario, negotiator: FakeNegotiator, devices: FakeMediaDevices) -> Self {
        let factory = Arc::new(FakeTransportFactory::new(scenario));
        let negotiator = Arc::new(negotiator);
        let devices = Arc::new(devices);
        let orchestrator = SessionOrchestrator::new(
            settings(),
            Arc::clone(&factory) as Arc<dyn PeerTransportFactory>,
            Arc::clone(&negotiator) as Arc<dyn SessionNegotiator>,
            Arc::clone(&devices) as Arc<dyn MediaDevices>,
        );

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let _subscription = orchestrator.subscribe(move |event| {
            sink.lock().unwrap().push(event.clone());
        });

        Self {
            orchestrator,
            factory,
            negotiator,
            devices,
            events,
        }
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Error(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn channel(&self) -> Arc<FakeDataChannel> {
        self.factory.last().channel()
    }
}

/// Let spawned session tasks (such as the release after a fatal error) run.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

pub fn settings() -> RealtimeSettings {
    RealtimeSettings::new("https://realtime.example.test", "test-access-key")
}

pub fn session_config() -> SessionConfig {
    settings().default_session_config()
}
