//! HTTP surface of the bot.
//!
//! `POST /webhook` takes externally pushed events, `POST /talk/chat-message`
//! and `POST /talk/bot` take the two Talk ingress payloads, and the `GET`
//! routes report status. Every ingress call is handled inline; nothing is
//! queued.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::commands::VERSION;
use crate::dispatch::{guarded, Dispatcher};
use crate::platform::talk::{describe_payload, normalize_chat_message, normalize_invocation};
use crate::platform::{emit, ReplyAction, ReplySink, Replies};
use crate::webhook::{WebhookResult, WebhookService, SIGNATURE_HEADER};

const APP_NAME: &str = "talkbot";

// ── Shared state ───────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub webhook: Arc<WebhookService>,
    pub sink: Arc<dyn ReplySink>,
    /// Whether the bot was fully configured at startup.
    pub initialized: bool,
}

// ── Response types ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, PartialEq)]
pub struct IngressResponse {
    status: &'static str,
    replies: Vec<ReplyAction>,
}

impl IngressResponse {
    fn from_replies(replies: Option<Replies>) -> Self {
        match replies {
            Some(replies) => Self {
                status: "ok",
                replies: replies.actions(),
            },
            None => Self {
                status: "ignored",
                replies: Vec::new(),
            },
        }
    }
}

// ── Handlers ───────────────────────────────────────────────────────────────────

async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<WebhookResult>) {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    let (status, result) = state.webhook.receive(&body, signature).await;
    (status, Json(result))
}

async fn webhook_status() -> Json<Value> {
    Json(json!({
        "status": "active",
        "message": "Webhook endpoint is ready",
        "timestamp": chrono::Utc::now().timestamp(),
        "version": VERSION,
    }))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let settings = state.dispatcher.settings();
    Json(json!({
        "app": APP_NAME,
        "version": VERSION,
        "status": if settings.is_enabled() { "enabled" } else { "disabled" },
        "initialized": state.initialized,
        "name": settings.name(),
        "features": settings.features(),
        "command_prefix": settings.command_prefix(),
        "response_mode": settings.response_mode(),
    }))
}

async fn bot_info(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let settings = state.dispatcher.settings();
    if !settings.is_enabled() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "status": "disabled", "message": "Bot is not enabled" })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "name": settings.name(),
            "description": settings.description(),
            "command_prefix": settings.command_prefix(),
            "features": settings.features(),
            "response_mode": settings.response_mode(),
            "version": VERSION,
        })),
    )
}

fn parse_ingress(kind: &str, body: &[u8]) -> Option<Value> {
    match serde_json::from_slice(body) {
        Ok(payload) => Some(payload),
        Err(e) => {
            debug!("Ignoring {} with invalid JSON: {}", kind, e);
            None
        }
    }
}

/// Native "message sent" notification.
async fn chat_message(State(state): State<AppState>, body: Bytes) -> Json<IngressResponse> {
    let Some(payload) = parse_ingress("chat message", &body) else {
        return Json(IngressResponse::from_replies(None));
    };
    let context = format!("chat message ({})", describe_payload(&payload));
    let replies = guarded(&context, process_chat_message(&state, &payload))
        .await
        .flatten();
    Json(IngressResponse::from_replies(replies))
}

async fn process_chat_message(state: &AppState, payload: &Value) -> Option<Replies> {
    let event = normalize_chat_message(payload)?;
    debug!(
        "Chat message {} in {} from {} at {:?}",
        event.id, event.conversation_token, event.actor_id, event.timestamp
    );
    let replies = state.dispatcher.handle_message(&event).await;
    emit(
        &replies,
        &event.conversation_token,
        Some(&event.id),
        state.sink.as_ref(),
    )
    .await;
    Some(replies)
}

/// Bot invocation carrying a typed activity.
async fn bot_invocation(State(state): State<AppState>, body: Bytes) -> Json<IngressResponse> {
    let Some(payload) = parse_ingress("bot invocation", &body) else {
        return Json(IngressResponse::from_replies(None));
    };
    let context = format!("bot invocation ({})", describe_payload(&payload));
    let replies = guarded(&context, process_invocation(&state, &payload))
        .await
        .flatten();
    Json(IngressResponse::from_replies(replies))
}

async fn process_invocation(state: &AppState, payload: &Value) -> Option<Replies> {
    let event = normalize_invocation(payload)?;
    let replies = state.dispatcher.handle_invocation(&event).await;
    emit(
        &replies,
        event.conversation_token(),
        event.message_id(),
        state.sink.as_ref(),
    )
    .await;
    Some(replies)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(receive_webhook))
        .route("/webhook/status", get(webhook_status))
        .route("/api/v1/status", get(status))
        .route("/api/v1/bot/info", get(bot_info))
        .route("/talk/chat-message", post(chat_message))
        .route("/talk/bot", post(bot_invocation))
        .with_state(state)
}

pub async fn serve(bind: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind to {bind}"))?;

    info!("Listening on http://{}", bind);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("Server error")?;

    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::bot_config;
    use crate::config::{BotConfig, TalkConfig};
    use crate::dispatch::tests::{dispatcher, FixedSettings, SpyDelegate};
    use crate::platform::talk::TalkClient;
    use crate::platform::tests::RecordingSink;
    use crate::webhook::{HmacVerifier, WebhookStatus};
    use httpmock::prelude::*;
    use std::time::Duration;

    fn state_with(config: BotConfig, sink: Arc<RecordingSink>) -> AppState {
        let dispatcher = Arc::new(dispatcher(config.clone(), Arc::new(SpyDelegate::default())));
        let verifier = Arc::new(HmacVerifier::new(Arc::new(FixedSettings(config))));
        AppState {
            webhook: Arc::new(WebhookService::new(
                dispatcher.clone(),
                sink.clone(),
                verifier,
                false,
            )),
            dispatcher,
            sink,
            initialized: true,
        }
    }

    fn state() -> (AppState, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (state_with(bot_config(), sink.clone()), sink)
    }

    #[tokio::test]
    async fn test_status_projects_config() {
        let (state, _) = state();
        let Json(body) = status(State(state)).await;
        assert_eq!(body["app"], "talkbot");
        assert_eq!(body["status"], "enabled");
        assert_eq!(body["initialized"], true);
        assert_eq!(body["name"], "HelpBot");
        assert_eq!(body["command_prefix"], "/");
        assert_eq!(body["response_mode"], "auto");
        assert_eq!(body["features"], json!(["webhook"]));
    }

    #[tokio::test]
    async fn test_bot_info_disabled_is_404() {
        let mut config = bot_config();
        config.enabled = false;
        let state = state_with(config, Arc::new(RecordingSink::default()));
        let (code, Json(body)) = bot_info(State(state)).await;
        assert_eq!(code, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "disabled");
    }

    #[tokio::test]
    async fn test_bot_info_enabled() {
        let (state, _) = state();
        let (code, Json(body)) = bot_info(State(state)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["description"], "Helpful bot for Nextcloud Talk");
        assert_eq!(body["version"], VERSION);
    }

    #[tokio::test]
    async fn test_webhook_status() {
        let Json(body) = webhook_status().await;
        assert_eq!(body["status"], "active");
        assert!(body["timestamp"].as_i64().is_some());
    }

    #[tokio::test]
    async fn test_receive_webhook_reads_signature_header() {
        let (state, _) = state();
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, "deadbeef".parse().unwrap());
        let (code, Json(result)) = receive_webhook(
            State(state),
            headers,
            Bytes::from_static(br#"{"event":"unknown"}"#),
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(result.status, WebhookStatus::Error);
    }

    #[tokio::test]
    async fn test_chat_message_command() {
        let (state, sink) = state();
        let body = json!({
            "id": 11,
            "message": "/about",
            "token": "room1",
            "actorType": "users",
            "actorId": "alice",
            "actorDisplayName": "Alice",
            "timestamp": 1700000000,
            "messageType": "comment"
        });
        let Json(response) =
            chat_message(State(state), Bytes::from(body.to_string())).await;

        assert_eq!(response.status, "ok");
        assert_eq!(response.replies.len(), 1);
        assert!(matches!(
            &response.replies[0],
            ReplyAction::Answer { text, is_reply: true } if text.contains("HelpBot")
        ));
        assert_eq!(sink.answers.lock().unwrap()[0].2.as_deref(), Some("11"));
    }

    #[tokio::test]
    async fn test_chat_message_answers_despite_slow_delivery() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .path("/ocs/v2.php/apps/spreed/api/v1/bot/room1/message");
            then.status(201).delay(Duration::from_secs(6));
        });

        let config = bot_config();
        let settings = Arc::new(FixedSettings(config.clone()));
        let talk = TalkConfig {
            timeout_secs: 1,
            ..TalkConfig::default()
        };
        let sink: Arc<dyn ReplySink> =
            Arc::new(TalkClient::new(&server.base_url(), &talk, settings.clone()).unwrap());
        let dispatcher = Arc::new(dispatcher(config, Arc::new(SpyDelegate::default())));
        let state = AppState {
            webhook: Arc::new(WebhookService::new(
                dispatcher.clone(),
                sink.clone(),
                Arc::new(HmacVerifier::new(settings)),
                false,
            )),
            dispatcher,
            sink,
            initialized: true,
        };

        let body = json!({ "id": 11, "message": "/about", "token": "room1", "actorId": "alice" });
        let Json(response) = tokio::time::timeout(
            Duration::from_secs(4),
            chat_message(State(state), Bytes::from(body.to_string())),
        )
        .await
        .expect("ingress should not wait for the slow Talk server");

        assert_eq!(response.status, "ok");
        assert_eq!(response.replies.len(), 1);
    }

    #[tokio::test]
    async fn test_chat_message_unwraps_embedded_json() {
        let (state, _) = state();
        let body = json!({
            "message": "{\"message\":\"hello\"}",
            "token": "room1",
            "actorId": "alice",
            "messageType": "comment"
        });
        let Json(response) =
            chat_message(State(state), Bytes::from(body.to_string())).await;
        assert_eq!(
            response.replies,
            vec![ReplyAction::Answer {
                text: "Hello! 👋".to_string(),
                is_reply: true
            }]
        );
    }

    #[tokio::test]
    async fn test_chat_message_garbage_is_noop() {
        let (state, sink) = state();
        let Json(response) = chat_message(State(state), Bytes::from_static(b"{oops")).await;
        assert_eq!(response.status, "ignored");
        assert!(response.replies.is_empty());
        assert!(sink.answers.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bot_invocation_reaction_and_join() {
        let (state, sink) = state();

        let like = json!({
            "type": "Like",
            "object": { "id": 5 },
            "target": { "id": "room1" },
            "content": "❤️"
        });
        let Json(response) =
            bot_invocation(State(state.clone()), Bytes::from(like.to_string())).await;
        assert_eq!(
            response.replies,
            vec![ReplyAction::Reaction {
                emoji: "❤️".to_string()
            }]
        );
        assert_eq!(
            sink.reactions.lock().unwrap()[0],
            ("room1".to_string(), "5".to_string(), "❤️".to_string())
        );

        let join = json!({ "type": "Join", "target": { "id": "room1" } });
        let Json(response) = bot_invocation(State(state), Bytes::from(join.to_string())).await;
        assert!(matches!(
            &response.replies[0],
            ReplyAction::Answer { is_reply: false, .. }
        ));
        assert_eq!(sink.answers.lock().unwrap()[0].2, None);
    }

    #[tokio::test]
    async fn test_bot_invocation_message() {
        let (state, _) = state();
        let create = json!({
            "type": "Create",
            "actor": { "id": "users/alice", "name": "Alice" },
            "object": { "id": "1", "content": "{\"message\":\"/xyz\",\"parameters\":[]}" },
            "target": { "id": "room1" }
        });
        let Json(response) = bot_invocation(State(state), Bytes::from(create.to_string())).await;
        assert!(matches!(
            &response.replies[0],
            ReplyAction::Answer { text, .. } if text.contains("`xyz`")
        ));
    }
}
