//! Control-channel message types.
//!
//! Outbound [`ClientEvent`]s and inbound [`ServerEvent`]s are JSON objects
//! discriminated by a `type` field. The inbound set is additive: types this
//! client does not know decode to [`ServerEvent::Unknown`] and are dropped by
//! the channel, while a known type with a broken payload is a
//! [`ProtocolError::Malformed`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{MaxTokens, SessionConfig};
use crate::error::ProtocolError;

/// Default sampling temperature when the session config leaves it unset.
pub const DEFAULT_TEMPERATURE: f32 = 0.8;
/// Default response cap when the session config leaves it unset.
pub const DEFAULT_MAX_RESPONSE_TOKENS: u32 = 4096;
/// Transcription model for user speech.
pub const TRANSCRIPTION_MODEL: &str = "whisper-1";
/// PCM16 audio format identifier.
pub const AUDIO_FORMAT_PCM16: &str = "pcm16";

// ── Outbound ───────────────────────────────────────────────────────

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionUpdate },

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate,

    #[serde(rename = "response.cancel")]
    ResponseCancel,
}

impl ClientEvent {
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::SessionUpdate { .. } => "session.update",
            Self::ConversationItemCreate { .. } => "conversation.item.create",
            Self::ResponseCreate => "response.create",
            Self::ResponseCancel => "response.cancel",
        }
    }

    /// A user text turn item.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::ConversationItemCreate {
            item: ConversationItem::user_text(text),
        }
    }
}

/// Session parameters carried by `session.update`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionUpdate {
    pub instructions: String,
    pub modalities: Vec<String>,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub input_audio_transcription: InputAudioTranscription,
    pub turn_detection: TurnDetection,
    pub temperature: f32,
    pub max_response_output_tokens: MaxTokens,
}

/// Session instructions: the mode prompt, followed by any extra
/// instructions after a blank line. Blank extras are ignored.
pub fn compose_instructions(system_prompt: &str, extra: Option<&str>) -> String {
    match extra.map(str::trim) {
        Some(extra) if !extra.is_empty() => format!("{system_prompt}\n\n{extra}"),
        _ => system_prompt.to_string(),
    }
}

impl SessionUpdate {
    /// Build the update for a session. Extra instructions from `config` are
    /// appended to `system_prompt`.
    pub fn new(system_prompt: &str, config: &SessionConfig) -> Self {
        Self {
            instructions: compose_instructions(system_prompt, config.instructions.as_deref()),
            modalities: vec!["text".to_string(), "audio".to_string()],
            voice: config.voice.clone(),
            input_audio_format: AUDIO_FORMAT_PCM16.to_string(),
            output_audio_format: AUDIO_FORMAT_PCM16.to_string(),
            input_audio_transcription: InputAudioTranscription {
                model: TRANSCRIPTION_MODEL.to_string(),
            },
            turn_detection: TurnDetection::default(),
            temperature: config.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_response_output_tokens: config
                .max_tokens
                .unwrap_or(MaxTokens::Limit(DEFAULT_MAX_RESPONSE_TOKENS)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputAudioTranscription {
    pub model: String,
}

/// Server-side voice activity detection settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
    pub create_response: bool,
}

impl Default for TurnDetection {
    fn default() -> Self {
        Self {
            kind: "server_vad".to_string(),
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
            create_response: true,
        }
    }
}

/// A conversation item created by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub content: Vec<ContentPart>,
}

impl ConversationItem {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            kind: "message".to_string(),
            role: "user".to_string(),
            content: vec![ContentPart::InputText { text: text.into() }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
}

// ── Inbound ────────────────────────────────────────────────────────

/// Error payload of a server `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub param: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RateLimit {
    pub name: String,
    #[serde(default)]
    pub limit: Option<f64>,
    #[serde(default)]
    pub remaining: Option<f64>,
    #[serde(default)]
    pub reset_seconds: Option<f64>,
}

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: Value,
    },

    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: Value,
    },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: Option<u64>,
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        #[serde(default)]
        audio_end_ms: Option<u64>,
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioCommitted {
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    InputTranscriptDelta {
        #[serde(default)]
        item_id: Option<String>,
        delta: String,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptCompleted {
        #[serde(default)]
        item_id: Option<String>,
        transcript: String,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    InputTranscriptFailed {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        error: Option<ApiError>,
    },

    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {
        #[serde(default)]
        item: Value,
    },

    #[serde(rename = "response.created")]
    ResponseCreated {
        #[serde(default)]
        response: Value,
    },

    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.audio.done")]
    ResponseAudioDone {
        #[serde(default)]
        response_id: Option<String>,
    },

    #[serde(rename = "response.audio_transcript.delta")]
    ResponseTranscriptDelta {
        #[serde(default)]
        response_id: Option<String>,
        delta: String,
    },

    #[serde(rename = "response.audio_transcript.done")]
    ResponseTranscriptDone {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "response.text.delta")]
    ResponseTextDelta {
        #[serde(default)]
        response_id: Option<String>,
        delta: String,
    },

    #[serde(rename = "response.text.done")]
    ResponseTextDone {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        text: String,
    },

    #[serde(rename = "output_audio_buffer.started")]
    OutputAudioStarted {
        #[serde(default)]
        response_id: Option<String>,
    },

    #[serde(rename = "output_audio_buffer.stopped")]
    OutputAudioStopped {
        #[serde(default)]
        response_id: Option<String>,
    },

    #[serde(rename = "rate_limits.updated")]
    RateLimitsUpdated {
        #[serde(default)]
        rate_limits: Vec<RateLimit>,
    },

    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: Value,
    },

    #[serde(rename = "error")]
    Error { error: ApiError },

    /// A type this client does not handle.
    #[serde(skip)]
    Unknown { event_type: String, payload: Value },
}

/// Types with a typed [`ServerEvent`] variant.
const KNOWN_TYPES: &[&str] = &[
    "session.created",
    "session.updated",
    "input_audio_buffer.speech_started",
    "input_audio_buffer.speech_stopped",
    "input_audio_buffer.committed",
    "conversation.item.input_audio_transcription.delta",
    "conversation.item.input_audio_transcription.completed",
    "conversation.item.input_audio_transcription.failed",
    "conversation.item.created",
    "response.created",
    "response.audio.delta",
    "response.audio.done",
    "response.audio_transcript.delta",
    "response.audio_transcript.done",
    "response.text.delta",
    "response.text.done",
    "output_audio_buffer.started",
    "output_audio_buffer.stopped",
    "rate_limits.updated",
    "response.done",
    "error",
];

impl ServerEvent {
    /// Decode one text frame.
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(frame)?;
        let event_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?
            .to_string();

        if !KNOWN_TYPES.contains(&event_type.as_str()) {
            return Ok(Self::Unknown {
                event_type,
                payload: value,
            });
        }

        serde_json::from_value(value).map_err(|e| ProtocolError::Malformed {
            event_type,
            message: e.to_string(),
        })
    }

    /// Wire `type` of this event.
    pub fn event_type(&self) -> &str {
        match self {
            Self::SessionCreated { .. } => "session.created",
            Self::SessionUpdated { .. } => "session.updated",
            Self::SpeechStarted { .. } => "input_audio_buffer.speech_started",
            Self::SpeechStopped { .. } => "input_audio_buffer.speech_stopped",
            Self::InputAudioCommitted { .. } => "input_audio_buffer.committed",
            Self::InputTranscriptDelta { .. } => {
                "conversation.item.input_audio_transcription.delta"
            }
            Self::InputTranscriptCompleted { .. } => {
                "conversation.item.input_audio_transcription.completed"
            }
            Self::InputTranscriptFailed { .. } => {
                "conversation.item.input_audio_transcription.failed"
            }
            Self::ConversationItemCreated { .. } => "conversation.item.created",
            Self::ResponseCreated { .. } => "response.created",
            Self::ResponseAudioDelta { .. } => "response.audio.delta",
            Self::ResponseAudioDone { .. } => "response.audio.done",
            Self::ResponseTranscriptDelta { .. } => "response.audio_transcript.delta",
            Self::ResponseTranscriptDone { .. } => "response.audio_transcript.done",
            Self::ResponseTextDelta { .. } => "response.text.delta",
            Self::ResponseTextDone { .. } => "response.text.done",
            Self::OutputAudioStarted { .. } => "output_audio_buffer.started",
            Self::OutputAudioStopped { .. } => "output_audio_buffer.stopped",
            Self::RateLimitsUpdated { .. } => "rate_limits.updated",
            Self::ResponseDone { .. } => "response.done",
            Self::Error { .. } => "error",
            Self::Unknown { event_type, .. } => event_type,
        }
    }

    /// Lifecycle events worth an `info` log line; deltas are not.
    pub const fn is_significant(&self) -> bool {
        matches!(
            self,
            Self::SessionCreated { .. }
                | Self::SessionUpdated { .. }
                | Self::SpeechStarted { .. }
                | Self::SpeechStopped { .. }
                | Self::InputTranscriptCompleted { .. }
                | Self::InputTranscriptFailed { .. }
                | Self::ResponseCreated { .. }
                | Self::ResponseDone { .. }
                | Self::OutputAudioStarted { .. }
                | Self::OutputAudioStopped { .. }
                | Self::Error { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_update_carries_defaults() {
        let config = SessionConfig::new("model-x", "verse");
        let event = ClientEvent::SessionUpdate {
            session: SessionUpdate::new("Be brief.", &config),
        };
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "session.update");
        let session = &value["session"];
        assert_eq!(session["instructions"], "Be brief.");
        assert_eq!(session["modalities"], json!(["text", "audio"]));
        assert_eq!(session["voice"], "verse");
        assert_eq!(session["input_audio_format"], "pcm16");
        assert_eq!(session["output_audio_format"], "pcm16");
        assert_eq!(session["input_audio_transcription"]["model"], "whisper-1");
        assert_eq!(session["turn_detection"]["type"], "server_vad");
        assert_eq!(session["turn_detection"]["prefix_padding_ms"], 300);
        assert_eq!(session["turn_detection"]["silence_duration_ms"], 500);
        assert_eq!(session["turn_detection"]["create_response"], true);
        assert_eq!(session["max_response_output_tokens"], 4096);
        let temperature = session["temperature"].as_f64().unwrap();
        assert!((temperature - 0.8).abs() < 1e-6);
    }

    #[test]
    fn unlimited_tokens_and_extra_instructions() {
        let config = SessionConfig::new("m", "alloy")
            .with_max_tokens(MaxTokens::Unlimited)
            .with_instructions("Use metric units.");
        let update = SessionUpdate::new("Coach prompt.", &config);
        let value = serde_json::to_value(&update).unwrap();

        assert_eq!(value["max_response_output_tokens"], "inf");
        assert_eq!(value["instructions"], "Coach prompt.\n\nUse metric units.");
    }

    #[test]
    fn blank_extra_instructions_are_ignored() {
        assert_eq!(compose_instructions("Coach.", None), "Coach.");
        assert_eq!(compose_instructions("Coach.", Some("  \n")), "Coach.");
        assert_eq!(
            compose_instructions("Coach.", Some(" Short answers. ")),
            "Coach.\n\nShort answers."
        );
    }

    #[test]
    fn text_turn_and_bare_events_serialize() {
        let value = serde_json::to_value(ClientEvent::user_text("hello")).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "conversation.item.create",
                "item": {
                    "type": "message",
                    "role": "user",
                    "content": [{ "type": "input_text", "text": "hello" }]
                }
            })
        );

        assert_eq!(
            serde_json::to_value(ClientEvent::ResponseCancel).unwrap(),
            json!({ "type": "response.cancel" })
        );
    }

    #[test]
    fn parses_known_events_with_extra_fields() {
        let event = ServerEvent::parse(
            r#"{"type":"input_audio_buffer.speech_started","event_id":"e1","audio_start_ms":120,"item_id":"i1"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            ServerEvent::SpeechStarted {
                audio_start_ms: Some(120),
                item_id: Some("i1".into())
            }
        );
        assert!(event.is_significant());

        let event =
            ServerEvent::parse(r#"{"type":"error","error":{"type":"invalid_request_error","message":"Rate limit reached"}}"#)
                .unwrap();
        match event {
            ServerEvent::Error { error } => assert_eq!(error.message, "Rate limit reached"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_preserved() {
        let event = ServerEvent::parse(r#"{"type":"response.function_call_arguments.delta","delta":"{"}"#)
            .unwrap();
        assert_eq!(event.event_type(), "response.function_call_arguments.delta");
        assert!(matches!(event, ServerEvent::Unknown { .. }));
        assert!(!event.is_significant());
    }

    #[test]
    fn missing_type_and_malformed_payloads_are_errors() {
        assert!(matches!(
            ServerEvent::parse(r#"{"delta":"x"}"#),
            Err(ProtocolError::MissingType)
        ));
        assert!(matches!(
            ServerEvent::parse("not json"),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            ServerEvent::parse(r#"{"type":"response.text.delta","delta":5}"#),
            Err(ProtocolError::Malformed { .. })
        ));
    }
}
