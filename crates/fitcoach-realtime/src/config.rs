//! Connection settings, per-session configuration and timer values.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable holding the negotiation service base URL.
pub const ENV_BASE_URL: &str = "FITCOACH_REALTIME_URL";
/// Environment variable holding the service access key.
pub const ENV_ACCESS_KEY: &str = "FITCOACH_REALTIME_KEY";
/// Optional override for the default realtime model.
pub const ENV_MODEL: &str = "FITCOACH_REALTIME_MODEL";
/// Optional override for the default voice.
pub const ENV_VOICE: &str = "FITCOACH_REALTIME_VOICE";
/// Optional override for the negotiation endpoint path.
pub const ENV_NEGOTIATION_PATH: &str = "FITCOACH_NEGOTIATION_PATH";

pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";
pub const DEFAULT_VOICE: &str = "alloy";
pub const DEFAULT_NEGOTIATION_PATH: &str = "/realtime-session";

/// Timer values used while establishing and monitoring a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// Max wait for the transport to reach `connected` after the answer is applied.
    pub connect: Duration,
    /// Max wait for the control channel `open` event.
    pub channel_open: Duration,
    /// Max wait for `session.updated` before continuing anyway.
    pub config_ack: Duration,
    /// Period of the background health check.
    pub health_interval: Duration,
    /// Listening this long without user speech is reported as stale.
    pub speech_stale_after: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            channel_open: Duration::from_secs(10),
            config_ack: Duration::from_secs(3),
            health_interval: Duration::from_secs(30),
            speech_stale_after: Duration::from_secs(300),
        }
    }
}

/// Process-level connection settings for the realtime service.
#[derive(Debug, Clone)]
pub struct RealtimeSettings {
    /// Base URL of the negotiation backend (no trailing slash required).
    pub base_url: String,
    /// Access key sent as bearer token and `apikey` header.
    pub access_key: String,
    /// Path appended to `base_url` for the offer/answer exchange.
    pub negotiation_path: String,
    /// Model used when the caller does not pick one.
    pub default_model: String,
    /// Voice used when the caller does not pick one.
    pub default_voice: String,
    pub timeouts: SessionTimeouts,
}

impl RealtimeSettings {
    /// Settings with explicit credentials and defaults for everything else.
    pub fn new(base_url: impl Into<String>, access_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            access_key: access_key.into(),
            negotiation_path: DEFAULT_NEGOTIATION_PATH.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            default_voice: DEFAULT_VOICE.to_string(),
            timeouts: SessionTimeouts::default(),
        }
    }

    /// Read settings from the process environment.
    ///
    /// Fails when either required connection parameter is missing; this is a
    /// startup-time error, not something to retry.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let base_url = read(ENV_BASE_URL).ok_or(ConfigError::MissingEnv(ENV_BASE_URL))?;
        let access_key = read(ENV_ACCESS_KEY).ok_or(ConfigError::MissingEnv(ENV_ACCESS_KEY))?;

        let mut settings = Self::new(base_url, access_key);
        if let Some(model) = read(ENV_MODEL) {
            settings.default_model = model;
        }
        if let Some(voice) = read(ENV_VOICE) {
            settings.default_voice = voice;
        }
        if let Some(path) = read(ENV_NEGOTIATION_PATH) {
            settings.negotiation_path = path;
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Check that the settings can be used to negotiate a session.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::MissingEnv(ENV_BASE_URL));
        }
        if self.access_key.trim().is_empty() {
            return Err(ConfigError::MissingEnv(ENV_ACCESS_KEY));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                field: ENV_BASE_URL,
                reason: format!("expected an http(s) URL, got '{}'", self.base_url),
            });
        }
        Ok(())
    }

    /// Full URL of the negotiation endpoint.
    pub fn negotiation_url(&self) -> String {
        let path = self.negotiation_path.trim_start_matches('/');
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    /// A [`SessionConfig`] using the configured default model and voice.
    pub fn default_session_config(&self) -> SessionConfig {
        SessionConfig::new(&self.default_model, &self.default_voice)
    }
}

/// Per-session configuration supplied by the caller of `start_session`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub model: String,
    pub voice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Response length cap; `None` uses the default cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<MaxTokens>,
    /// Extra instructions appended to the mode prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl SessionConfig {
    pub fn new(model: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            voice: voice.into(),
            temperature: None,
            max_tokens: None,
            instructions: None,
        }
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: MaxTokens) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}

/// Response length cap as understood by the realtime protocol.
///
/// Serialized as a number, or as the string `"inf"` when unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxTokens {
    Limit(u32),
    Unlimited,
}

impl Serialize for MaxTokens {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Limit(n) => serializer.serialize_u32(*n),
            Self::Unlimited => serializer.serialize_str("inf"),
        }
    }
}

impl<'de> Deserialize<'de> for MaxTokens {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(s) if s == "inf" => Ok(Self::Unlimited),
            serde_json::Value::Number(n) => n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(Self::Limit)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid token cap {n}"))),
            other => Err(serde::de::Error::custom(format!(
                "expected a number or \"inf\", got {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn missing_base_url_is_a_config_error() {
        let err = RealtimeSettings::from_lookup(lookup(&[(ENV_ACCESS_KEY, "k")])).unwrap_err();
        assert_eq!(err, ConfigError::MissingEnv(ENV_BASE_URL));
    }

    #[test]
    fn blank_access_key_is_missing() {
        let err = RealtimeSettings::from_lookup(lookup(&[
            (ENV_BASE_URL, "https://api.example.com"),
            (ENV_ACCESS_KEY, "   "),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingEnv(ENV_ACCESS_KEY));
    }

    #[test]
    fn overrides_are_applied() {
        let settings = RealtimeSettings::from_lookup(lookup(&[
            (ENV_BASE_URL, "https://api.example.com/functions/v1/"),
            (ENV_ACCESS_KEY, "secret"),
            (ENV_VOICE, "verse"),
            (ENV_NEGOTIATION_PATH, "/coach-voice"),
        ]))
        .unwrap();
        assert_eq!(settings.default_voice, "verse");
        assert_eq!(settings.default_model, DEFAULT_MODEL);
        assert_eq!(
            settings.negotiation_url(),
            "https://api.example.com/functions/v1/coach-voice"
        );
    }

    #[test]
    fn non_http_base_url_is_rejected() {
        let err = RealtimeSettings::new("ftp://nope", "k").validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn default_timeouts() {
        let t = SessionTimeouts::default();
        assert_eq!(t.connect, Duration::from_secs(15));
        assert_eq!(t.channel_open, Duration::from_secs(10));
        assert_eq!(t.config_ack, Duration::from_secs(3));
        assert_eq!(t.health_interval, Duration::from_secs(30));
    }

    #[test]
    fn max_tokens_serializes_inf() {
        assert_eq!(serde_json::to_value(MaxTokens::Unlimited).unwrap(), "inf");
        assert_eq!(serde_json::to_value(MaxTokens::Limit(512)).unwrap(), 512);
        let parsed: MaxTokens = serde_json::from_str("\"inf\"").unwrap();
        assert_eq!(parsed, MaxTokens::Unlimited);
    }
}
