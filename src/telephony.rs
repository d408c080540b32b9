//! Telephony provider client — the narrow call-placement interface.
//!
//! The provider drives everything else through callbacks; the only request
//! we ever originate is placing the call and telling the provider where
//! those callbacks go.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::config::TelephonyConfig;
use crate::error::TelephonyError;

/// A call-placement request.
#[derive(Debug, Clone)]
pub struct PlaceCall {
    /// Destination number, E.164.
    pub to: String,
    /// Caller number shown to the callee.
    pub from: String,
    /// Where the provider fetches the first instruction set.
    pub answer_url: String,
    /// Where the provider posts lifecycle events.
    pub event_url: String,
}

/// Narrow interface to the call-control provider.
#[async_trait]
pub trait CallControl: Send + Sync {
    /// Place an outbound call. Returns the provider-assigned call id.
    async fn place_call(&self, req: &PlaceCall) -> Result<String, TelephonyError>;
}

#[derive(Deserialize)]
struct CreateCallResponse {
    uuid: String,
}

/// REST call-control client (Vonage-style voice API).
pub struct HttpCallControl {
    config: TelephonyConfig,
    client: reqwest::Client,
}

impl HttpCallControl {
    pub fn new(config: TelephonyConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CallControl for HttpCallControl {
    async fn place_call(&self, req: &PlaceCall) -> Result<String, TelephonyError> {
        let body = serde_json::json!({
            "to": [{"type": "phone", "number": req.to}],
            "from": {"type": "phone", "number": req.from},
            "answer_url": [req.answer_url],
            "answer_method": "POST",
            "event_url": [req.event_url],
            "event_method": "POST",
        });

        let resp = self
            .client
            .post(&self.config.api_url)
            .basic_auth(
                self.config.api_key.expose_secret(),
                Some(self.config.api_secret.expose_secret()),
            )
            .header("X-Application-Id", &self.config.application_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| TelephonyError::RequestFailed {
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(TelephonyError::RequestFailed {
                reason: format!("status {status}: {detail}"),
            });
        }

        let created: CreateCallResponse =
            resp.json()
                .await
                .map_err(|e| TelephonyError::InvalidResponse {
                    reason: e.to_string(),
                })?;

        Ok(created.uuid)
    }
}
