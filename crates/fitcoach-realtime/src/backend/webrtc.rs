//! [`PeerTransport`] backed by the `webrtc` crate.
//!
//! Local capture frames (24 kHz mono, 20 ms) are Opus-encoded onto a
//! `TrackLocalStaticSample`; remote Opus RTP is decoded back to 24 kHz mono
//! and surfaced as a [`RemoteAudioTrack`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use opus::{Application, Channels, Decoder, Encoder};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine};
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use crate::audio_io::{AudioFrame, CaptureTrack, FRAME_SAMPLES, RemoteAudioTrack, SESSION_SAMPLE_RATE};
use crate::error::TransportError;
use crate::transport::{
    ChannelEvent, ChannelEventHandler, ChannelState, DataChannelTransport, IceState, PeerState,
    PeerTransport, PeerTransportFactory, TransportEvent, TransportEventHandler,
};

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

const MAX_OPUS_PACKET: usize = 4000;
/// 120 ms at 24 kHz, the longest Opus frame.
const MAX_DECODED_SAMPLES: usize = 2880;
const REMOTE_FRAME_BUFFER: usize = 256;
const ICE_GATHER_TIMEOUT: Duration = Duration::from_secs(5);
const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Builds one `RTCPeerConnection` per session attempt.
#[derive(Debug, Clone)]
pub struct WebRtcTransportFactory {
    ice_servers: Vec<String>,
}

impl Default for WebRtcTransportFactory {
    fn default() -> Self {
        Self {
            ice_servers: vec![DEFAULT_STUN_SERVER.to_string()],
        }
    }
}

impl WebRtcTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_ice_servers(mut self, urls: Vec<String>) -> Self {
        self.ice_servers = urls;
        self
    }

    fn build_api() -> Result<API, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| TransportError::Unavailable(format!("failed to register codecs: {e}")))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| {
                TransportError::Unavailable(format!("failed to register interceptors: {e}"))
            })?;

        Ok(APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build())
    }
}

#[async_trait]
impl PeerTransportFactory for WebRtcTransportFactory {
    fn check_available(&self) -> Result<(), TransportError> {
        Self::build_api().map(|_| ())
    }

    async fn create(&self) -> Result<Arc<dyn PeerTransport>, TransportError> {
        let api = Self::build_api()?;
        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let peer = Arc::new(api.new_peer_connection(config).await.map_err(|e| {
            TransportError::Unavailable(format!("failed to create peer connection: {e}"))
        })?);

        let transport = WebRtcPeerTransport {
            peer,
            handler: Arc::new(Mutex::new(None)),
            tasks: CancellationToken::new(),
        };
        transport.install_callbacks();
        tracing::debug!("WebRTC peer connection created");
        Ok(Arc::new(transport))
    }
}

type HandlerSlot<H> = Arc<Mutex<Option<H>>>;

fn current<H: Clone>(slot: &HandlerSlot<H>) -> Option<H> {
    slot.lock().ok().and_then(|guard| guard.clone())
}

fn map_peer_state(state: RTCPeerConnectionState) -> PeerState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => PeerState::New,
        RTCPeerConnectionState::Connecting => PeerState::Connecting,
        RTCPeerConnectionState::Connected => PeerState::Connected,
        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
        RTCPeerConnectionState::Failed => PeerState::Failed,
        RTCPeerConnectionState::Closed => PeerState::Closed,
    }
}

fn map_ice_state(state: RTCIceConnectionState) -> IceState {
    match state {
        RTCIceConnectionState::Unspecified | RTCIceConnectionState::New => IceState::New,
        RTCIceConnectionState::Checking => IceState::Checking,
        RTCIceConnectionState::Connected => IceState::Connected,
        RTCIceConnectionState::Completed => IceState::Completed,
        RTCIceConnectionState::Disconnected => IceState::Disconnected,
        RTCIceConnectionState::Failed => IceState::Failed,
        RTCIceConnectionState::Closed => IceState::Closed,
    }
}

fn map_channel_state(state: RTCDataChannelState) -> ChannelState {
    match state {
        RTCDataChannelState::Unspecified | RTCDataChannelState::Connecting => {
            ChannelState::Connecting
        }
        RTCDataChannelState::Open => ChannelState::Open,
        RTCDataChannelState::Closing => ChannelState::Closing,
        RTCDataChannelState::Closed => ChannelState::Closed,
    }
}

/// One `RTCPeerConnection` plus the media pumps feeding it.
pub struct WebRtcPeerTransport {
    peer: Arc<RTCPeerConnection>,
    handler: HandlerSlot<TransportEventHandler>,
    /// Cancels capture encoders, RTCP readers and remote decoders.
    tasks: CancellationToken,
}

impl WebRtcPeerTransport {
    fn install_callbacks(&self) {
        let slot = Arc::clone(&self.handler);
        self.peer
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let mapped = map_peer_state(state);
                tracing::debug!(state = %state, "Peer connection state changed");
                if let Some(handler) = current(&slot) {
                    handler(TransportEvent::PeerStateChanged(mapped));
                }
                Box::pin(async {})
            }));

        let slot = Arc::clone(&self.handler);
        self.peer
            .on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                tracing::debug!(state = %state, "ICE connection state changed");
                if let Some(handler) = current(&slot) {
                    handler(TransportEvent::IceStateChanged(map_ice_state(state)));
                }
                Box::pin(async {})
            }));

        let slot = Arc::clone(&self.handler);
        let tasks = self.tasks.clone();
        self.peer.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            let slot = Arc::clone(&slot);
            let cancel = tasks.child_token();
            Box::pin(async move {
                if track.kind() != RTPCodecType::Audio {
                    return;
                }
                let (tx, remote) = RemoteAudioTrack::channel(track.id(), REMOTE_FRAME_BUFFER);
                tracing::info!(track = %track.id(), "Remote audio track received");
                if let Some(handler) = current(&slot) {
                    handler(TransportEvent::RemoteTrack(remote));
                }
                tokio::spawn(decode_remote(track, tx, cancel));
            })
        }));
    }
}

/// Reads remote Opus RTP and forwards decoded PCM frames.
async fn decode_remote(
    track: Arc<TrackRemote>,
    frames: tokio::sync::mpsc::Sender<AudioFrame>,
    cancel: CancellationToken,
) {
    let mut decoder = match Decoder::new(SESSION_SAMPLE_RATE, Channels::Mono) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create Opus decoder");
            return;
        }
    };
    let mut pcm = vec![0i16; MAX_DECODED_SAMPLES];
    let mut dropped = 0u64;

    loop {
        let packet = tokio::select! {
            () = cancel.cancelled() => break,
            read = track.read_rtp() => match read {
                Ok((packet, _)) => packet,
                Err(e) => {
                    tracing::debug!(error = %e, "Remote track ended");
                    break;
                }
            },
        };
        if packet.payload.is_empty() {
            continue;
        }
        let decoded = match decoder.decode(&packet.payload, &mut pcm, false) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable Opus packet");
                continue;
            }
        };
        let frame = AudioFrame::mono(pcm[..decoded].to_vec(), SESSION_SAMPLE_RATE);
        match frames.try_send(frame) {
            Ok(()) => {}
            Err(tokio::sync::mpsc::error::TrySendError::Full(_)) => {
                dropped += 1;
                if dropped.is_power_of_two() {
                    tracing::warn!(dropped, "Playback is not draining remote audio");
                }
            }
            Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => break,
        }
    }
}

/// Encodes capture frames onto the outgoing Opus track.
async fn encode_capture(
    mut source: tokio::sync::broadcast::Receiver<AudioFrame>,
    track: Arc<TrackLocalStaticSample>,
    cancel: CancellationToken,
) {
    let mut encoder = match Encoder::new(SESSION_SAMPLE_RATE, Channels::Mono, Application::Voip) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create Opus encoder");
            return;
        }
    };
    let mut pending: Vec<i16> = Vec::with_capacity(FRAME_SAMPLES * 2);
    let mut packet = vec![0u8; MAX_OPUS_PACKET];

    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => break,
            recv = source.recv() => match recv {
                Ok(frame) => frame,
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Capture encoder lagged behind microphone");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };
        pending.extend_from_slice(&frame.samples);

        while pending.len() >= FRAME_SAMPLES {
            let chunk: Vec<i16> = pending.drain(..FRAME_SAMPLES).collect();
            let len = match encoder.encode(&chunk, &mut packet) {
                Ok(len) => len,
                Err(e) => {
                    tracing::warn!(error = %e, "Opus encode failed");
                    continue;
                }
            };
            let sample = Sample {
                data: Bytes::copy_from_slice(&packet[..len]),
                duration: FRAME_DURATION,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                tracing::debug!(error = %e, "Stopping capture encoder");
                return;
            }
        }
    }
}

#[async_trait]
impl PeerTransport for WebRtcPeerTransport {
    fn set_event_handler(&self, handler: TransportEventHandler) {
        if let Ok(mut slot) = self.handler.lock() {
            *slot = Some(handler);
        }
    }

    async fn add_local_track(&self, track: Arc<dyn CaptureTrack>) -> Result<(), TransportError> {
        let local = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48_000,
                channels: 2,
                ..Default::default()
            },
            "audio".to_string(),
            format!("fitcoach-{}", track.id()),
        ));

        let rtp_sender = self
            .peer
            .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| TransportError::Track(format!("failed to add audio track: {e}")))?;

        // RTCP must be drained for interceptors to run.
        let rtcp_cancel = self.tasks.child_token();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            loop {
                tokio::select! {
                    () = rtcp_cancel.cancelled() => break,
                    read = rtp_sender.read(&mut buf) => if read.is_err() { break },
                }
            }
        });

        tokio::spawn(encode_capture(
            track.subscribe(),
            local,
            self.tasks.child_token(),
        ));
        Ok(())
    }

    async fn create_data_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannelTransport>, TransportError> {
        let channel = self
            .peer
            .create_data_channel(label, None)
            .await
            .map_err(|e| TransportError::Channel(format!("failed to create data channel: {e}")))?;
        Ok(Arc::new(WebRtcDataChannel::new(channel)))
    }

    async fn create_offer(&self) -> Result<String, TransportError> {
        let offer = self
            .peer
            .create_offer(None)
            .await
            .map_err(|e| TransportError::Sdp(format!("failed to create offer: {e}")))?;
        Ok(offer.sdp)
    }

    async fn set_local_description(&self, offer_sdp: &str) -> Result<String, TransportError> {
        let offer = RTCSessionDescription::offer(offer_sdp.to_string())
            .map_err(|e| TransportError::Sdp(format!("invalid offer: {e}")))?;
        let mut gathered = self.peer.gathering_complete_promise().await;
        self.peer
            .set_local_description(offer)
            .await
            .map_err(|e| TransportError::Sdp(format!("failed to set local description: {e}")))?;

        // Non-trickle signalling: send the offer with its candidates.
        if tokio::time::timeout(ICE_GATHER_TIMEOUT, gathered.recv())
            .await
            .is_err()
        {
            tracing::warn!("ICE gathering incomplete, sending partial offer");
        }

        self.peer
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| TransportError::Sdp("missing local description".into()))
    }

    async fn set_remote_answer(&self, answer_sdp: &str) -> Result<(), TransportError> {
        let answer = RTCSessionDescription::answer(answer_sdp.to_string())
            .map_err(|e| TransportError::Sdp(format!("invalid answer: {e}")))?;
        self.peer
            .set_remote_description(answer)
            .await
            .map_err(|e| TransportError::Sdp(format!("failed to set remote description: {e}")))
    }

    fn connection_state(&self) -> PeerState {
        map_peer_state(self.peer.connection_state())
    }

    fn ice_state(&self) -> IceState {
        map_ice_state(self.peer.ice_connection_state())
    }

    async fn close(&self) {
        self.tasks.cancel();
        if let Err(e) = self.peer.close().await {
            tracing::debug!(error = %e, "Peer connection close reported an error");
        }
    }
}

/// `RTCDataChannel` carrying UTF-8 JSON frames.
pub struct WebRtcDataChannel {
    channel: Arc<RTCDataChannel>,
    handler: HandlerSlot<ChannelEventHandler>,
}

impl WebRtcDataChannel {
    fn new(channel: Arc<RTCDataChannel>) -> Self {
        let handler: HandlerSlot<ChannelEventHandler> = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&handler);
        channel.on_open(Box::new(move || {
            if let Some(handler) = current(&slot) {
                handler(ChannelEvent::Open);
            }
            Box::pin(async {})
        }));

        let slot = Arc::clone(&handler);
        channel.on_close(Box::new(move || {
            if let Some(handler) = current(&slot) {
                handler(ChannelEvent::Closed);
            }
            Box::pin(async {})
        }));

        let slot = Arc::clone(&handler);
        channel.on_error(Box::new(move |err: webrtc::Error| {
            if let Some(handler) = current(&slot) {
                handler(ChannelEvent::Error(err.to_string()));
            }
            Box::pin(async {})
        }));

        let slot = Arc::clone(&handler);
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => {
                    if let Some(handler) = current(&slot) {
                        handler(ChannelEvent::Message(text));
                    }
                }
                Err(_) => tracing::warn!(len = msg.data.len(), "Ignoring non-UTF-8 channel frame"),
            }
            Box::pin(async {})
        }));

        Self { channel, handler }
    }
}

#[async_trait]
impl DataChannelTransport for WebRtcDataChannel {
    fn label(&self) -> String {
        self.channel.label().to_string()
    }

    fn ready_state(&self) -> ChannelState {
        map_channel_state(self.channel.ready_state())
    }

    fn set_event_handler(&self, handler: ChannelEventHandler) {
        if let Ok(mut slot) = self.handler.lock() {
            *slot = Some(handler);
        }
    }

    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if self.ready_state() != ChannelState::Open {
            return Err(TransportError::Closed);
        }
        self.channel
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Channel(e.to_string()))
    }

    async fn close(&self) {
        if let Err(e) = self.channel.close().await {
            tracing::debug!(error = %e, "Data channel close reported an error");
        }
    }
}
