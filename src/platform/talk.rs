use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::debug;

use crate::config::{BotSettings, TalkConfig};
use crate::platform::{InvocationEvent, MessageEvent, ReplySink};

type HmacSha256 = Hmac<Sha256>;

/// Talk rejects chat messages longer than this.
const MAX_MESSAGE_CHARS: usize = 32_000;

/// Replace `content` with the `message` field of an embedded JSON envelope.
///
/// Anything that does not parse, or parses without a `message` key, is
/// returned unchanged.
pub fn unwrap_content(content: &str) -> String {
    if !content.starts_with('{') {
        return content.to_string();
    }
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(map)) => match map.get("message") {
            Some(Value::String(message)) => message.clone(),
            Some(Value::Null) | None => content.to_string(),
            Some(other) => other.to_string(),
        },
        _ => content.to_string(),
    }
}

/// First of `keys` present on `obj` as a non-empty string or a number.
fn field(obj: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match obj.get(*key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

pub fn synthesize_message_id() -> String {
    format!("msg_{}", uuid::Uuid::new_v4().simple())
}

/// `message <id> in <token>` for log lines, read from a flat chat payload,
/// a webhook `data` object or an invocation's `object`/`target`. Missing
/// parts print as `?`.
pub fn describe_payload(payload: &Value) -> String {
    let flat = payload
        .get("data")
        .filter(|data| data.is_object())
        .unwrap_or(payload);
    let object = payload.get("object").unwrap_or(&Value::Null);
    let target = payload.get("target").unwrap_or(&Value::Null);

    let id = field(flat, &["messageId", "id"])
        .or_else(|| field(object, &["id"]))
        .unwrap_or_else(|| "?".to_string());
    let token = field(flat, &["conversationToken", "token"])
        .or_else(|| field(target, &["id"]))
        .unwrap_or_else(|| "?".to_string());
    format!("message {} in {}", id, token)
}

/// Normalize a flat chat-message payload: the native "message sent"
/// notification, and the `data` object of an inbound webhook.
pub fn normalize_chat_message(payload: &Value) -> Option<MessageEvent> {
    if !payload.is_object() {
        return None;
    }
    let raw = field(payload, &["message"]).unwrap_or_default();

    Some(MessageEvent {
        id: field(payload, &["messageId", "id"]).unwrap_or_else(synthesize_message_id),
        conversation_token: field(payload, &["conversationToken", "token"]).unwrap_or_default(),
        actor_id: field(payload, &["actorId"]).unwrap_or_default(),
        actor_display_name: field(payload, &["actorDisplayName"]).unwrap_or_default(),
        content: unwrap_content(&raw),
        message_type: field(payload, &["messageType"]).unwrap_or_else(|| "comment".to_string()),
        timestamp: field(payload, &["timestamp"]),
    })
}

/// Normalize a bot invocation (activity-streams style payload).
///
/// Returns `None` for activity types the bot does not handle and for
/// message activities without any content.
pub fn normalize_invocation(payload: &Value) -> Option<InvocationEvent> {
    let kind = payload.get("type").and_then(Value::as_str)?;
    let object = payload.get("object").cloned().unwrap_or(Value::Null);
    let actor = payload.get("actor").cloned().unwrap_or(Value::Null);
    let target = payload.get("target").cloned().unwrap_or(Value::Null);
    let conversation_token = field(&target, &["id"]).unwrap_or_default();

    match kind {
        "Create" | "Activity" => {
            let raw = match object.get("content") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => return None,
                Some(other) => other.to_string(),
            };
            Some(InvocationEvent::Message(MessageEvent {
                id: field(&object, &["id"]).unwrap_or_else(synthesize_message_id),
                conversation_token,
                actor_id: field(&actor, &["id"]).unwrap_or_default(),
                actor_display_name: field(&actor, &["name"]).unwrap_or_default(),
                content: unwrap_content(&raw),
                message_type: "chat".to_string(),
                timestamp: field(payload, &["timestamp"]),
            }))
        }
        "Like" => Some(InvocationEvent::Reaction {
            conversation_token,
            message_id: field(&object, &["id"]).unwrap_or_default(),
            emoji: field(payload, &["content"]).unwrap_or_default(),
        }),
        "Join" => Some(InvocationEvent::Join { conversation_token }),
        "Leave" => Some(InvocationEvent::Leave { conversation_token }),
        other => {
            debug!("Ignoring bot invocation of type {}", other);
            None
        }
    }
}

/// Break `text` into pieces of at most `max_chars` characters, preferring
/// to cut after a newline, then after a space.
fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while let Some((limit, _)) = rest.char_indices().nth(max_chars) {
        let window = &rest[..limit];
        let cut = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .map(|pos| pos + 1)
            .unwrap_or(limit);
        chunks.push(window[..cut].to_string());
        rest = &rest[cut..];
    }
    chunks.push(rest.to_string());

    chunks
}

/// Hex HMAC-SHA256 of `random + body` keyed by the bot secret.
pub fn sign(secret: &str, random: &str, body: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .context("Failed to initialize HMAC signer")?;
    mac.update(random.as_bytes());
    mac.update(body.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Delivers replies through the Nextcloud Talk bot API.
pub struct TalkClient {
    client: reqwest::Client,
    base_url: String,
    settings: Arc<dyn BotSettings>,
}

impl TalkClient {
    /// Ingress handlers wait for delivery, so every request is bounded by the
    /// `[talk]` timeouts.
    pub fn new(
        base_url: &str,
        config: &TalkConfig,
        settings: Arc<dyn BotSettings>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("talkbot/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build Talk HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            settings,
        })
    }

    fn bot_url(&self, conversation_token: &str, tail: &str) -> String {
        format!(
            "{}/ocs/v2.php/apps/spreed/api/v1/bot/{}/{}",
            self.base_url, conversation_token, tail
        )
    }

    async fn post_signed(&self, url: &str, signed_text: &str, body: &Value) -> Result<()> {
        let random = uuid::Uuid::new_v4().simple().to_string();
        let signature = sign(&self.settings.secret(), &random, signed_text)?;

        debug!("Posting to Talk bot API: {}", url);

        let response = self
            .client
            .post(url)
            .header("OCS-APIRequest", "true")
            .header("Accept", "application/json")
            .header("X-Nextcloud-Talk-Bot-Random", &random)
            .header("X-Nextcloud-Talk-Bot-Signature", signature)
            .json(body)
            .send()
            .await
            .context("Failed to send request to Talk")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Talk bot API error ({}): {}", status, error_body);
        }
        Ok(())
    }
}

#[async_trait]
impl ReplySink for TalkClient {
    async fn send_answer(
        &self,
        conversation_token: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<()> {
        let url = self.bot_url(conversation_token, "message");
        let reply_to = reply_to.and_then(|id| id.parse::<i64>().ok());

        for chunk in split_message(text, MAX_MESSAGE_CHARS) {
            let mut body = json!({ "message": chunk });
            if let Some(id) = reply_to {
                body["replyTo"] = json!(id);
            }
            self.post_signed(&url, &chunk, &body).await?;
        }
        Ok(())
    }

    async fn send_reaction(
        &self,
        conversation_token: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<()> {
        let url = self.bot_url(conversation_token, &format!("reaction/{}", message_id));
        self.post_signed(&url, emoji, &json!({ "reaction": emoji }))
            .await
    }
}
