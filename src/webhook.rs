use std::sync::Arc;

use axum::http::StatusCode;
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::config::BotSettings;
use crate::dispatch::{guarded, Dispatcher};
use crate::platform::talk::{describe_payload, normalize_chat_message};
use crate::platform::{emit, ReplySink};

pub const SIGNATURE_HEADER: &str = "x-talk-signature";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Success,
    Ignored,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookResult {
    pub status: WebhookStatus,
    pub message: String,
}

impl WebhookResult {
    fn new(status: WebhookStatus, message: &str) -> Self {
        Self {
            status,
            message: message.to_string(),
        }
    }

    pub fn success(message: &str) -> Self {
        Self::new(WebhookStatus::Success, message)
    }

    pub fn ignored(message: &str) -> Self {
        Self::new(WebhookStatus::Ignored, message)
    }

    pub fn error(message: &str) -> Self {
        Self::new(WebhookStatus::Error, message)
    }

    pub fn http_status(&self) -> StatusCode {
        match self.status {
            WebhookStatus::Success | WebhookStatus::Ignored => StatusCode::OK,
            WebhookStatus::Error => StatusCode::BAD_REQUEST,
        }
    }
}

/// Checks a webhook signature header against the raw request body.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, body: &[u8], signature: &str) -> bool;
}

/// Hex HMAC-SHA256 of the raw body keyed by the bot secret, with an
/// optional `sha256=` prefix.
pub struct HmacVerifier {
    settings: Arc<dyn BotSettings>,
}

impl HmacVerifier {
    pub fn new(settings: Arc<dyn BotSettings>) -> Self {
        Self { settings }
    }
}

impl SignatureVerifier for HmacVerifier {
    fn verify(&self, body: &[u8], signature: &str) -> bool {
        let digest = signature.trim();
        let digest = digest.strip_prefix("sha256=").unwrap_or(digest);
        let Ok(expected) = hex::decode(digest) else {
            return false;
        };
        let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(self.settings.secret().as_bytes()) else {
            return false;
        };
        mac.update(body);
        mac.verify_slice(&expected).is_ok()
    }
}

/// Entry point for externally pushed events.
pub struct WebhookService {
    dispatcher: Arc<Dispatcher>,
    sink: Arc<dyn ReplySink>,
    verifier: Arc<dyn SignatureVerifier>,
    require_signature: bool,
}

impl WebhookService {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        sink: Arc<dyn ReplySink>,
        verifier: Arc<dyn SignatureVerifier>,
        require_signature: bool,
    ) -> Self {
        Self {
            dispatcher,
            sink,
            verifier,
            require_signature,
        }
    }

    pub async fn receive(&self, body: &[u8], signature: Option<&str>) -> (StatusCode, WebhookResult) {
        let payload: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => {
                warn!("Rejected webhook: invalid JSON ({})", e);
                let result = WebhookResult::error("Invalid JSON payload");
                return (result.http_status(), result);
            }
        };

        debug!(
            "Webhook received (signature provided: {})",
            signature.is_some_and(|s| !s.is_empty())
        );

        let context = format!("webhook ({})", describe_payload(&payload));
        let result = match guarded(&context, self.handle(&payload, body, signature)).await {
            Some(result) => result,
            None => {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    WebhookResult::error("Internal error processing webhook"),
                )
            }
        };
        (result.http_status(), result)
    }

    async fn handle(&self, payload: &Value, body: &[u8], signature: Option<&str>) -> WebhookResult {
        match signature.filter(|s| !s.is_empty()) {
            Some(signature) => {
                if !self.verifier.verify(body, signature) {
                    warn!("Rejected webhook: invalid signature");
                    return WebhookResult::error("Invalid signature");
                }
            }
            None if self.require_signature => {
                warn!("Rejected webhook: missing signature");
                return WebhookResult::error("Missing signature");
            }
            None => {}
        }

        match payload.get("event").and_then(Value::as_str).unwrap_or_default() {
            "message" => self.handle_message_event(payload).await,
            "reaction" => {
                debug!("Reaction event acknowledged");
                WebhookResult::success("Reaction event acknowledged")
            }
            other => {
                debug!("Unhandled webhook event type: {:?}", other);
                WebhookResult::ignored("Event type not handled")
            }
        }
    }

    async fn handle_message_event(&self, payload: &Value) -> WebhookResult {
        let data = match payload.get("data") {
            Some(data @ Value::Object(map)) if !map.is_empty() => data,
            _ => return WebhookResult::error("No message data provided"),
        };
        let Some(event) = normalize_chat_message(data) else {
            return WebhookResult::error("No message data provided");
        };

        let replies = self.dispatcher.handle_message(&event).await;
        emit(
            &replies,
            &event.conversation_token,
            Some(&event.id),
            self.sink.as_ref(),
        )
        .await;

        WebhookResult::success("Message processed")
    }
}
