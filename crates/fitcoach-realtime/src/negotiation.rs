//! Offer/answer exchange with the negotiation backend.

use async_trait::async_trait;
use serde::Serialize;

use crate::config::RealtimeSettings;
use crate::error::NegotiationError;

/// Body posted to the negotiation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NegotiationRequest {
    pub sdp: String,
    pub model: String,
    pub voice: String,
    pub instructions: String,
}

/// Exchanges a local SDP offer for the remote SDP answer.
#[async_trait]
pub trait SessionNegotiator: Send + Sync {
    async fn exchange(&self, request: &NegotiationRequest) -> Result<String, NegotiationError>;
}

/// [`SessionNegotiator`] backed by an HTTP POST.
///
/// The access key is sent both as a bearer token and as an `apikey` header;
/// a 2xx body is the raw answer SDP.
#[derive(Debug, Clone)]
pub struct HttpNegotiator {
    client: reqwest::Client,
    url: String,
    access_key: String,
}

impl HttpNegotiator {
    pub fn new(settings: &RealtimeSettings) -> Self {
        Self::with_client(reqwest::Client::new(), settings)
    }

    pub fn with_client(client: reqwest::Client, settings: &RealtimeSettings) -> Self {
        Self {
            client,
            url: settings.negotiation_url(),
            access_key: settings.access_key.clone(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SessionNegotiator for HttpNegotiator {
    async fn exchange(&self, request: &NegotiationRequest) -> Result<String, NegotiationError> {
        tracing::debug!(
            url = %self.url,
            model = %request.model,
            voice = %request.voice,
            offer_len = request.sdp.len(),
            "Posting SDP offer"
        );

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.access_key)
            .header("apikey", &self.access_key)
            .json(request)
            .send()
            .await
            .map_err(|e| NegotiationError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| NegotiationError::Request(format!("failed to read answer body: {e}")))?;

        if !status.is_success() {
            tracing::error!(status = status.as_u16(), body = %body, "SDP negotiation rejected");
            return Err(NegotiationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if body.trim().is_empty() {
            return Err(NegotiationError::EmptyAnswer);
        }

        tracing::debug!(answer_len = body.len(), "Received SDP answer");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_has_expected_fields() {
        let request = NegotiationRequest {
            sdp: "v=0".into(),
            model: "m".into(),
            voice: "alloy".into(),
            instructions: "hi".into(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"sdp": "v=0", "model": "m", "voice": "alloy", "instructions": "hi"})
        );
    }

    #[test]
    fn url_comes_from_settings() {
        let settings = RealtimeSettings::new("https://api.example.com/", "key");
        let negotiator = HttpNegotiator::new(&settings);
        assert_eq!(negotiator.url(), "https://api.example.com/realtime-session");
    }
}
