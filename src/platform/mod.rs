pub mod talk;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Message types the bot is willing to interpret.
const CHAT_MESSAGE_TYPES: [&str; 2] = ["comment", "chat"];

/// A normalized chat message, whatever ingress it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    /// Platform-assigned id, or a synthesized `msg_<uuid>` when absent
    pub id: String,
    /// Room/conversation token; empty when the source did not provide one
    pub conversation_token: String,
    pub actor_id: String,
    pub actor_display_name: String,
    /// Message text, already unwrapped from any embedded JSON envelope
    pub content: String,
    pub message_type: String,
    /// Event time as reported by the source, informational only
    pub timestamp: Option<String>,
}

impl MessageEvent {
    pub fn is_chat(&self) -> bool {
        CHAT_MESSAGE_TYPES.contains(&self.message_type.as_str())
    }
}

/// Everything a bot invocation can carry.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationEvent {
    Message(MessageEvent),
    Reaction {
        conversation_token: String,
        message_id: String,
        emoji: String,
    },
    Join {
        conversation_token: String,
    },
    Leave {
        conversation_token: String,
    },
}

impl InvocationEvent {
    pub fn conversation_token(&self) -> &str {
        match self {
            InvocationEvent::Message(message) => &message.conversation_token,
            InvocationEvent::Reaction {
                conversation_token, ..
            }
            | InvocationEvent::Join { conversation_token }
            | InvocationEvent::Leave { conversation_token } => conversation_token,
        }
    }

    /// The message a reply or reaction should point at, if any.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            InvocationEvent::Message(message) => Some(&message.id),
            InvocationEvent::Reaction { message_id, .. } if !message_id.is_empty() => {
                Some(message_id)
            }
            _ => None,
        }
    }
}

/// A single thing the bot wants to say or do in the chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ReplyAction {
    Answer {
        text: String,
        #[serde(rename = "isReply")]
        is_reply: bool,
    },
    Reaction {
        emoji: String,
    },
}

/// Which responder produced the answer, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Responder {
    External,
    Command,
    Mode,
    Mention,
    Join,
}

/// The outcome of dispatching one event: at most one answer and one reaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replies {
    pub answer: Option<(Responder, String, bool)>,
    pub reaction: Option<String>,
}

impl Replies {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn answer(responder: Responder, text: String, is_reply: bool) -> Self {
        Self {
            answer: Some((responder, text, is_reply)),
            reaction: None,
        }
    }

    pub fn reaction(emoji: String) -> Self {
        Self {
            answer: None,
            reaction: Some(emoji),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.answer.is_none() && self.reaction.is_none()
    }

    pub fn responder(&self) -> Option<Responder> {
        self.answer.as_ref().map(|(responder, _, _)| *responder)
    }

    pub fn actions(&self) -> Vec<ReplyAction> {
        let mut actions = Vec::new();
        if let Some((_, text, is_reply)) = &self.answer {
            actions.push(ReplyAction::Answer {
                text: text.clone(),
                is_reply: *is_reply,
            });
        }
        if let Some(emoji) = &self.reaction {
            actions.push(ReplyAction::Reaction {
                emoji: emoji.clone(),
            });
        }
        actions
    }
}

/// Where the reply actions go. Delivery is the sink's problem.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send_answer(
        &self,
        conversation_token: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<()>;

    async fn send_reaction(
        &self,
        conversation_token: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<()>;
}

/// Sink used when no delivery endpoint is configured; the replies are only
/// returned to the caller and written to the log.
pub struct LogSink;

#[async_trait]
impl ReplySink for LogSink {
    async fn send_answer(
        &self,
        conversation_token: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<()> {
        info!(
            "Answer for {} (reply to {:?}): {} chars",
            conversation_token,
            reply_to,
            text.len()
        );
        Ok(())
    }

    async fn send_reaction(
        &self,
        conversation_token: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<()> {
        info!(
            "Reaction {} on message {} in {}",
            emoji, message_id, conversation_token
        );
        Ok(())
    }
}

/// Hand the replies to the sink. Failures are logged and dropped.
pub async fn emit(
    replies: &Replies,
    conversation_token: &str,
    message_id: Option<&str>,
    sink: &dyn ReplySink,
) {
    if replies.is_empty() {
        return;
    }
    if conversation_token.is_empty() {
        warn!("Dropping replies: event has no conversation token");
        return;
    }

    if let Some((responder, text, is_reply)) = &replies.answer {
        debug!("Sending {:?} answer to {}", responder, conversation_token);
        let reply_to = if *is_reply { message_id } else { None };
        if let Err(e) = sink.send_answer(conversation_token, text, reply_to).await {
            warn!("Failed to deliver answer to {}: {:#}", conversation_token, e);
        }
    }

    if let (Some(emoji), Some(message_id)) = (&replies.reaction, message_id) {
        if let Err(e) = sink
            .send_reaction(conversation_token, message_id, emoji)
            .await
        {
            warn!(
                "Failed to deliver reaction to {}: {:#}",
                conversation_token, e
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every call instead of delivering it.
    #[derive(Default)]
    pub struct RecordingSink {
        pub answers: Mutex<Vec<(String, String, Option<String>)>>,
        pub reactions: Mutex<Vec<(String, String, String)>>,
        pub fail: bool,
    }

    #[async_trait]
    impl ReplySink for RecordingSink {
        async fn send_answer(
            &self,
            conversation_token: &str,
            text: &str,
            reply_to: Option<&str>,
        ) -> Result<()> {
            self.answers.lock().unwrap().push((
                conversation_token.to_string(),
                text.to_string(),
                reply_to.map(str::to_string),
            ));
            if self.fail {
                anyhow::bail!("delivery refused");
            }
            Ok(())
        }

        async fn send_reaction(
            &self,
            conversation_token: &str,
            message_id: &str,
            emoji: &str,
        ) -> Result<()> {
            self.reactions.lock().unwrap().push((
                conversation_token.to_string(),
                message_id.to_string(),
                emoji.to_string(),
            ));
            Ok(())
        }
    }

    #[test]
    fn test_is_chat() {
        let mut event = MessageEvent {
            id: "1".to_string(),
            conversation_token: "t".to_string(),
            actor_id: "alice".to_string(),
            actor_display_name: "Alice".to_string(),
            content: "hi".to_string(),
            message_type: "comment".to_string(),
            timestamp: None,
        };
        assert!(event.is_chat());
        event.message_type = "chat".to_string();
        assert!(event.is_chat());
        event.message_type = "system".to_string();
        assert!(!event.is_chat());
    }

    #[test]
    fn test_actions_serialize() {
        let replies = Replies::answer(Responder::Command, "pong".to_string(), true);
        let json = serde_json::to_value(replies.actions()).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{ "type": "answer", "text": "pong", "isReply": true }])
        );
    }

    #[tokio::test]
    async fn test_emit_reply_targets_original_message() {
        let sink = RecordingSink::default();
        let replies = Replies::answer(Responder::Command, "hello".to_string(), true);
        emit(&replies, "room1", Some("42"), &sink).await;

        let answers = sink.answers.lock().unwrap();
        assert_eq!(
            answers[0],
            ("room1".to_string(), "hello".to_string(), Some("42".to_string()))
        );
    }

    #[tokio::test]
    async fn test_emit_plain_answer_has_no_reply_target() {
        let sink = RecordingSink::default();
        let replies = Replies::answer(Responder::Join, "welcome".to_string(), false);
        emit(&replies, "room1", Some("42"), &sink).await;
        assert_eq!(sink.answers.lock().unwrap()[0].2, None);
    }

    #[tokio::test]
    async fn test_emit_without_token_is_dropped() {
        let sink = RecordingSink::default();
        let replies = Replies::answer(Responder::Command, "hello".to_string(), true);
        emit(&replies, "", Some("42"), &sink).await;
        assert!(sink.answers.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_emit_swallows_delivery_failure() {
        let sink = RecordingSink {
            fail: true,
            ..Default::default()
        };
        let replies = Replies {
            answer: Some((Responder::Mode, "hi".to_string(), true)),
            reaction: Some("👍".to_string()),
        };
        emit(&replies, "room1", Some("7"), &sink).await;
        assert_eq!(sink.answers.lock().unwrap().len(), 1);
        assert_eq!(sink.reactions.lock().unwrap().len(), 1);
    }
}
