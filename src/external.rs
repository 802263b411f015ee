use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{BotConfig, ExternalConfig};
use crate::platform::talk::synthesize_message_id;
use crate::platform::MessageEvent;

/// Request body sent to the external workflow webhook.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExternalPayload {
    pub message_id: String,
    pub conversation_token: String,
    pub user_id: String,
    pub user_display_name: String,
    pub message: String,
    pub timestamp: String,
    pub message_type: String,
}

impl ExternalPayload {
    pub fn from_event(event: &MessageEvent) -> Self {
        let or_generated = |value: &str| {
            if value.is_empty() {
                synthesize_message_id()
            } else {
                value.to_string()
            }
        };
        Self {
            message_id: or_generated(&event.id),
            conversation_token: or_generated(&event.conversation_token),
            user_id: event.actor_id.clone(),
            user_display_name: event.actor_display_name.clone(),
            message: event.content.clone(),
            timestamp: chrono::Local::now().to_rfc3339(),
            message_type: if event.message_type.is_empty() {
                "chat".to_string()
            } else {
                event.message_type.clone()
            },
        }
    }
}

/// The upstream body shape an answer was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// `{"response": "...", "shouldReply": bool}`
    Standard,
    /// `{"message": "..."}`
    Message,
    /// `"..."`
    Bare,
}

/// Canonical answer from the external workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalResponse {
    pub text: String,
    pub should_reply: bool,
    pub shape: ResponseShape,
}

impl ExternalResponse {
    /// Reconcile one of the accepted body shapes. `None` means "no opinion".
    pub fn reconcile(body: &Value) -> Option<Self> {
        let non_empty = |v: Option<&Value>| {
            v.and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        match body {
            Value::String(text) if !text.is_empty() => Some(Self {
                text: text.clone(),
                should_reply: true,
                shape: ResponseShape::Bare,
            }),
            Value::Object(map) => {
                let should_reply = map
                    .get("shouldReply")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                let (text, shape) = if let Some(text) = non_empty(map.get("response")) {
                    (text, ResponseShape::Standard)
                } else if let Some(text) = non_empty(map.get("message")) {
                    (text, ResponseShape::Message)
                } else {
                    return None;
                };
                Some(Self {
                    text,
                    should_reply,
                    shape,
                })
            }
            _ => None,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.should_reply && !self.text.is_empty()
    }
}

/// Something that can be asked for an answer before local handling runs.
#[async_trait]
pub trait Delegate: Send + Sync {
    /// Never fails: any problem resolves to `None`.
    async fn delegate(&self, event: &MessageEvent, config: &BotConfig) -> Option<ExternalResponse>;
}

/// Accept only absolute http(s) URLs with a host.
pub fn is_well_formed_url(url: &str) -> bool {
    match reqwest::Url::parse(url) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some()
        }
        Err(_) => false,
    }
}

/// HTTP client for the external workflow webhook.
pub struct WebhookClient {
    client: reqwest::Client,
}

impl WebhookClient {
    pub fn new(config: &ExternalConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("talkbot/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self { client })
    }

    async fn post(&self, url: &str, payload: &ExternalPayload) -> Result<Option<ExternalResponse>> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .json(payload)
            .send()
            .await
            .context("Failed to send request to external webhook")?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            warn!("External webhook returned {}: {}", status, body);
            return Ok(None);
        }

        let body: Value = response
            .json()
            .await
            .context("Failed to parse external webhook response")?;

        let reconciled = ExternalResponse::reconcile(&body);
        match &reconciled {
            Some(response) => debug!(
                "External webhook answered {} with {:?} shape (should reply: {})",
                payload.message_id, response.shape, response.should_reply
            ),
            None => debug!("External webhook had no answer for {}", payload.message_id),
        }
        Ok(reconciled)
    }
}

#[async_trait]
impl Delegate for WebhookClient {
    async fn delegate(&self, event: &MessageEvent, config: &BotConfig) -> Option<ExternalResponse> {
        if !config.external_integration_enabled {
            return None;
        }
        let url = config.external_webhook_url.trim();
        if url.is_empty() {
            warn!("External integration is enabled but no webhook URL is configured");
            return None;
        }
        if !is_well_formed_url(url) {
            warn!("Invalid external webhook URL: {}", url);
            return None;
        }

        let payload = ExternalPayload::from_event(event);
        debug!("Sending message {} to external webhook {}", payload.message_id, url);

        match self.post(url, &payload).await {
            Ok(response) => response,
            Err(e) => {
                warn!("External webhook call failed: {:#}", e);
                None
            }
        }
    }
}
