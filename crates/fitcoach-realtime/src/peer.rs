//! Peer connection: offer/answer negotiation and connectivity tracking.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;

use crate::audio_io::{MediaStream, RemoteAudioTrack};
use crate::error::PeerError;
use crate::negotiation::{NegotiationRequest, SessionNegotiator};
use crate::observer::{ObserverRegistry, Subscription};
use crate::transport::{
    DataChannelTransport, IceState, PeerState, PeerTransport, PeerTransportFactory,
    TransportEvent,
};

/// What the remote side should run, sent along with the offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferParams {
    pub model: String,
    pub voice: String,
    pub instructions: String,
}

#[derive(Clone)]
struct Listeners {
    connect: ObserverRegistry<()>,
    disconnect: ObserverRegistry<PeerState>,
    error: ObserverRegistry<PeerError>,
    remote_track: ObserverRegistry<RemoteAudioTrack>,
}

impl Listeners {
    fn new() -> Self {
        Self {
            connect: ObserverRegistry::new("peer.connect"),
            disconnect: ObserverRegistry::new("peer.disconnect"),
            error: ObserverRegistry::new("peer.error"),
            remote_track: ObserverRegistry::new("peer.remote_track"),
        }
    }

    fn clear(&self) {
        self.connect.clear();
        self.disconnect.clear();
        self.error.clear();
        self.remote_track.clear();
    }
}

/// One transport session with the realtime endpoint.
pub struct PeerConnection {
    transport: Arc<dyn PeerTransport>,
    state: Arc<watch::Sender<PeerState>>,
    listeners: Listeners,
    closed: AtomicBool,
}

impl PeerConnection {
    /// Allocate a transport and start observing its state.
    pub async fn create(factory: &dyn PeerTransportFactory) -> Result<Self, PeerError> {
        let transport = factory.create().await?;
        let (state_tx, _) = watch::channel(transport.connection_state());
        let state = Arc::new(state_tx);
        let listeners = Listeners::new();

        let handler_state = Arc::clone(&state);
        let handler_listeners = listeners.clone();
        transport.set_event_handler(Arc::new(move |event| {
            handle_transport_event(&handler_state, &handler_listeners, event);
        }));

        tracing::debug!("Peer transport created");
        Ok(Self {
            transport,
            state,
            listeners,
            closed: AtomicBool::new(false),
        })
    }

    /// Send every track of `stream` to the remote side.
    pub async fn add_local_stream(&self, stream: &MediaStream) -> Result<(), PeerError> {
        for track in &stream.tracks {
            self.transport.add_local_track(Arc::clone(track)).await?;
            tracing::debug!(track = %track.id(), "Local audio track added");
        }
        Ok(())
    }

    pub(crate) async fn create_data_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannelTransport>, PeerError> {
        Ok(self.transport.create_data_channel(label).await?)
    }

    /// Offer, exchange with the backend, apply the answer, then wait for
    /// `connected`. No retry happens here.
    pub async fn negotiate(
        &self,
        negotiator: &dyn SessionNegotiator,
        params: OfferParams,
        connect_timeout: Duration,
    ) -> Result<(), PeerError> {
        let offer = self.transport.create_offer().await?;
        let local = self.transport.set_local_description(&offer).await?;
        tracing::debug!(offer_len = local.len(), "Local description set");

        let request = NegotiationRequest {
            sdp: local,
            model: params.model,
            voice: params.voice,
            instructions: params.instructions,
        };
        let answer = negotiator.exchange(&request).await?;

        self.transport.set_remote_answer(&answer).await?;
        tracing::debug!("Remote answer applied; waiting for connectivity");

        self.wait_connected(connect_timeout).await
    }

    async fn wait_connected(&self, limit: Duration) -> Result<(), PeerError> {
        let mut rx = self.state.subscribe();
        let reached = tokio::time::timeout(
            limit,
            rx.wait_for(|s| *s == PeerState::Connected || s.is_terminal()),
        )
        .await;

        let state = match reached {
            Err(_) => {
                tracing::error!(timeout = ?limit, "Peer connection timed out");
                return Err(PeerError::Timeout(limit));
            }
            Ok(Err(_)) => PeerState::Closed,
            Ok(Ok(state)) => *state,
        };

        if state == PeerState::Connected {
            tracing::info!("Peer connection established");
            Ok(())
        } else {
            tracing::error!(state = ?state, "Peer connection failed during negotiation");
            Err(PeerError::Failed(state))
        }
    }

    pub fn connection_state(&self) -> PeerState {
        *self.state.borrow()
    }

    pub fn ice_state(&self) -> IceState {
        self.transport.ice_state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == PeerState::Connected
    }

    pub fn on_connect<F>(&self, handler: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.listeners.connect.subscribe(move |()| handler())
    }

    /// Fires on `disconnected`, `failed` and `closed`.
    pub fn on_disconnect<F>(&self, handler: F) -> Subscription
    where
        F: Fn(PeerState) + Send + Sync + 'static,
    {
        self.listeners.disconnect.subscribe(move |state| handler(*state))
    }

    /// Fires when the transport enters `failed`.
    pub fn on_error<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&PeerError) + Send + Sync + 'static,
    {
        self.listeners.error.subscribe(handler)
    }

    pub fn on_remote_track<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&RemoteAudioTrack) + Send + Sync + 'static,
    {
        self.listeners.remote_track.subscribe(handler)
    }

    /// Close the transport. Later calls do nothing.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.listeners.clear();
        self.transport.close().await;
        self.state.send_replace(PeerState::Closed);
        tracing::debug!("Peer connection closed");
    }
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("state", &self.connection_state())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

fn handle_transport_event(
    state: &watch::Sender<PeerState>,
    listeners: &Listeners,
    event: TransportEvent,
) {
    match event {
        TransportEvent::PeerStateChanged(new_state) => {
            let previous = state.send_replace(new_state);
            if previous == new_state {
                return;
            }
            tracing::info!(from = ?previous, to = ?new_state, "Peer state changed");

            if new_state == PeerState::Connected {
                listeners.connect.emit(&());
            }
            if new_state.is_disconnect() {
                listeners.disconnect.emit(&new_state);
            }
            if new_state == PeerState::Failed {
                listeners.error.emit(&PeerError::Failed(new_state));
            }
        }
        TransportEvent::IceStateChanged(ice) => {
            tracing::debug!(ice = ?ice, "ICE state changed");
        }
        TransportEvent::RemoteTrack(track) => {
            tracing::info!(track = track.id(), "Remote audio track received");
            listeners.remote_track.emit(&track);
        }
    }
}
