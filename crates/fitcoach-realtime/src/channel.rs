//! The `oai-events` control channel: JSON protocol frames over a data channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{ChannelError, PeerError};
use crate::observer::{ObserverRegistry, Subscription};
use crate::peer::PeerConnection;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::transport::{ChannelEvent, ChannelState, DataChannelTransport};

/// Label the realtime endpoint expects for its event channel.
pub const CONTROL_CHANNEL_LABEL: &str = "oai-events";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Connecting,
    Open,
    Closed,
    Failed(String),
}

struct Shared {
    transport: Arc<dyn DataChannelTransport>,
    phase: watch::Sender<Phase>,
    configured: watch::Sender<bool>,
    events: ObserverRegistry<ServerEvent>,
    closed: AtomicBool,
}

/// Reliable, ordered JSON message channel to the realtime endpoint.
pub struct ControlChannel {
    shared: Arc<Shared>,
}

impl ControlChannel {
    /// Open the control channel on `peer` and start dispatching inbound frames.
    pub async fn create(peer: &PeerConnection) -> Result<Self, ChannelError> {
        let transport = peer
            .create_data_channel(CONTROL_CHANNEL_LABEL)
            .await
            .map_err(|e| match e {
                PeerError::Transport(t) => ChannelError::Transport(t),
                other => ChannelError::Failed(other.to_string()),
            })?;

        let initial = match transport.ready_state() {
            ChannelState::Open => Phase::Open,
            ChannelState::Connecting => Phase::Connecting,
            ChannelState::Closing | ChannelState::Closed => Phase::Closed,
        };
        let (phase, _) = watch::channel(initial);
        let (configured, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            transport: Arc::clone(&transport),
            phase,
            configured,
            events: ObserverRegistry::new("control.events"),
            closed: AtomicBool::new(false),
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        transport.set_event_handler(Arc::new(move |event| {
            if let Some(shared) = weak.upgrade() {
                shared.handle(event);
            }
        }));

        tracing::debug!(label = CONTROL_CHANNEL_LABEL, "Control channel created");
        Ok(Self { shared })
    }

    /// Resolve once the channel is open. Fails on error, premature close, or
    /// when `limit` elapses.
    pub async fn wait_until_open(&self, limit: Duration) -> Result<(), ChannelError> {
        let mut rx = self.shared.phase.subscribe();
        let outcome = tokio::time::timeout(
            limit,
            rx.wait_for(|phase| *phase != Phase::Connecting),
        )
        .await;

        let phase = match outcome {
            Err(_) => {
                tracing::error!(timeout = ?limit, "Control channel did not open in time");
                return Err(ChannelError::Timeout(limit));
            }
            Ok(Err(_)) => Phase::Closed,
            Ok(Ok(phase)) => (*phase).clone(),
        };

        match phase {
            Phase::Open => Ok(()),
            Phase::Failed(message) => Err(ChannelError::Failed(message)),
            Phase::Closed | Phase::Connecting => Err(ChannelError::ClosedBeforeOpen),
        }
    }

    /// Serialize and transmit `event`.
    ///
    /// Returns `false` without sending when the channel is not open.
    pub async fn send(&self, event: &ClientEvent) -> bool {
        let event_type = event.event_type();
        if !self.is_open() {
            tracing::error!(event_type, state = ?self.state(), "Control channel not open; dropping message");
            return false;
        }

        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(event_type, error = %e, "Failed to encode control message");
                return false;
            }
        };

        match self.shared.transport.send_text(frame).await {
            Ok(()) => {
                tracing::debug!(event_type, "Control message sent");
                true
            }
            Err(e) => {
                tracing::error!(event_type, error = %e, "Failed to send control message");
                false
            }
        }
    }

    /// Wait for `session.updated`. Returns whether the ack arrived within
    /// `limit`; the caller continues either way.
    pub async fn wait_for_session_configured(&self, limit: Duration) -> bool {
        if self.is_session_configured() {
            return true;
        }
        let mut rx = self.shared.configured.subscribe();
        let acked = matches!(
            tokio::time::timeout(limit, rx.wait_for(|configured| *configured)).await,
            Ok(Ok(_))
        );
        if !acked {
            tracing::warn!(timeout = ?limit, "No session.updated acknowledgment; continuing");
        }
        acked
    }

    pub fn is_session_configured(&self) -> bool {
        *self.shared.configured.borrow()
    }

    /// Receive every known inbound event.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(handler)
    }

    pub fn state(&self) -> ChannelState {
        match &*self.shared.phase.borrow() {
            Phase::Connecting => ChannelState::Connecting,
            Phase::Open => ChannelState::Open,
            Phase::Closed | Phase::Failed(_) => ChannelState::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Close the channel and forget the configuration ack. Idempotent.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.configured.send_replace(false);
        self.shared.phase.send_replace(Phase::Closed);
        self.shared.events.clear();
        self.shared.transport.close().await;
        tracing::debug!("Control channel closed");
    }
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("state", &self.state())
            .field("configured", &self.is_session_configured())
            .finish()
    }
}

impl Shared {
    fn handle(&self, event: ChannelEvent) {
        // Late transport callbacks after close() are dropped.
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        match event {
            ChannelEvent::Open => {
                self.phase.send_replace(Phase::Open);
                tracing::info!(label = CONTROL_CHANNEL_LABEL, "Control channel open");
            }
            ChannelEvent::Closed => {
                self.configured.send_replace(false);
                self.phase.send_replace(Phase::Closed);
                tracing::info!(label = CONTROL_CHANNEL_LABEL, "Control channel closed by transport");
            }
            ChannelEvent::Error(message) => {
                tracing::error!(error = %message, "Control channel error");
                self.phase.send_if_modified(|phase| {
                    if *phase == Phase::Connecting {
                        *phase = Phase::Failed(message);
                        true
                    } else {
                        false
                    }
                });
            }
            ChannelEvent::Message(frame) => self.dispatch(&frame),
        }
    }

    fn dispatch(&self, frame: &str) {
        let event = match ServerEvent::parse(frame) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed control message");
                return;
            }
        };

        if let ServerEvent::Unknown { event_type, .. } = &event {
            tracing::debug!(event_type = %event_type, "Ignoring unknown control message");
            return;
        }

        if event.is_significant() {
            tracing::info!(event_type = event.event_type(), "Control message received");
        } else {
            tracing::trace!(event_type = event.event_type(), "Control message received");
        }

        if matches!(event, ServerEvent::SessionUpdated { .. }) {
            self.configured.send_replace(true);
        }

        self.events.emit(&event);
    }
}
