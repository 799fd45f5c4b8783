use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::message::AlertMessage;
use super::transport::{Ack, Transport, TransportError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Endpoints, each one is a recipient
    pub urls: Vec<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

/// Longest response body kept in a rejection
const MAX_REASON_LEN: usize = 512;

/// JSON POST transport
pub struct WebhookTransport {
    client: Client,
    headers: HashMap<String, String>,
    timeout_ms: u64,
}

impl WebhookTransport {
    pub const ID: &'static str = "webhook";

    pub fn new(config: &WebhookConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(concat!("uppe-sentinel/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Invalid(format!("webhook client: {e}")))?;

        Ok(Self { client, headers: config.headers.clone(), timeout_ms: config.timeout_ms })
    }

    pub fn payload(message: &AlertMessage) -> serde_json::Value {
        json!({
            "event": message.kind,
            "subject": message.subject(),
            "resource": {
                "id": message.resource_id,
                "name": message.resource_name,
                "url": message.resource_url,
                "type": message.resource_type,
            },
            "incident_id": message.incident_id,
            "occurred_at": message.occurred_at,
            "error_message": message.error_message,
            "response_time_ms": message.response_time_ms,
            "incident_duration_seconds": message.incident_duration_seconds,
            "recent_checks": message.recent_checks,
        })
    }
}

#[async_trait]
impl Transport for WebhookTransport {
    fn id(&self) -> &str {
        Self::ID
    }

    async fn send(&self, recipient: &str, message: &AlertMessage) -> Result<Ack, TransportError> {
        let url = reqwest::Url::parse(recipient)
            .map_err(|e| TransportError::Invalid(format!("webhook url '{recipient}': {e}")))?;

        let mut request = self.client.post(url).json(&Self::payload(message));
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(self.timeout_ms)
            } else if e.is_builder() {
                TransportError::Invalid(e.to_string())
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(Ack { transport: Self::ID.to_string(), detail: Some(status.to_string()) });
        }

        let mut reason = response.text().await.unwrap_or_default();
        if reason.len() > MAX_REASON_LEN {
            let cut = (0..=MAX_REASON_LEN).rev().find(|&i| reason.is_char_boundary(i)).unwrap_or(0);
            reason.truncate(cut);
        }
        let permanent = status.is_client_error() && !matches!(status.as_u16(), 408 | 429);
        Err(TransportError::Rejected { status: Some(status.as_u16()), reason, permanent })
    }
}
