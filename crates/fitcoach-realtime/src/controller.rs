//! Translates session intents into control messages.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::channel::ControlChannel;
use crate::config::SessionConfig;
use crate::prompts::CoachMode;
use crate::protocol::{ClientEvent, ServerEvent, SessionUpdate};

/// Per-session intent layer on top of a [`ControlChannel`].
pub struct SessionController {
    channel: Arc<ControlChannel>,
    config_ack_timeout: Duration,
    last_speech_at: Mutex<Option<DateTime<Utc>>>,
}

impl SessionController {
    pub fn new(channel: Arc<ControlChannel>, config_ack_timeout: Duration) -> Self {
        Self {
            channel,
            config_ack_timeout,
            last_speech_at: Mutex::new(None),
        }
    }

    /// Send `session.update` and wait for its acknowledgment.
    ///
    /// Does nothing if the session is already configured. Returns whether the
    /// server acknowledged in time; a missing ack is not an error.
    pub async fn configure(&self, system_prompt: &str, mode: CoachMode, config: &SessionConfig) -> bool {
        if self.channel.is_session_configured() {
            tracing::warn!(mode = %mode, "Session already configured; ignoring configure request");
            return true;
        }

        let update = SessionUpdate::new(system_prompt, config);
        tracing::info!(
            mode = %mode,
            voice = %update.voice,
            temperature = update.temperature,
            "Configuring realtime session"
        );

        if !self.channel.send(&ClientEvent::SessionUpdate { session: update }).await {
            return false;
        }
        self.channel
            .wait_for_session_configured(self.config_ack_timeout)
            .await
    }

    /// Add a user text turn and ask for a response.
    pub async fn send_text(&self, text: &str) -> bool {
        if !self.channel.send(&ClientEvent::user_text(text)).await {
            return false;
        }
        self.channel.send(&ClientEvent::ResponseCreate).await
    }

    /// Ask the server to stop the in-flight response.
    pub async fn cancel_response(&self) -> bool {
        self.channel.send(&ClientEvent::ResponseCancel).await
    }

    /// Record bookkeeping for an inbound event.
    pub fn observe_inbound(&self, event: &ServerEvent) {
        if matches!(event, ServerEvent::SpeechStarted { .. }) {
            if let Ok(mut last) = self.last_speech_at.lock() {
                *last = Some(Utc::now());
            }
        }
    }

    pub fn last_speech_at(&self) -> Option<DateTime<Utc>> {
        self.last_speech_at.lock().ok().and_then(|last| *last)
    }

    /// Forget per-session bookkeeping. The channel is left as is.
    pub fn reset(&self) {
        if let Ok(mut last) = self.last_speech_at.lock() {
            *last = None;
        }
    }

    pub fn channel(&self) -> &Arc<ControlChannel> {
        &self.channel
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("channel", &self.channel)
            .field("last_speech_at", &self.last_speech_at())
            .finish()
    }
}
