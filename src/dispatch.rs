use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use futures::FutureExt;
use tracing::{debug, error, info};

use crate::commands;
use crate::config::{BotConfig, BotSettings};
use crate::external::Delegate;
use crate::platform::{InvocationEvent, MessageEvent, Replies, Responder};
use crate::responder;

pub type Clock = Arc<dyn Fn() -> DateTime<FixedOffset> + Send + Sync>;

/// The command step: `(line after prefix, config, actor name, now) -> answer`.
/// An empty answer means the command produced nothing.
pub type Interpreter =
    Arc<dyn Fn(&str, &BotConfig, &str, DateTime<FixedOffset>) -> String + Send + Sync>;

/// Decides how the bot answers a single event.
///
/// Holds no per-event state: the settings are snapshotted on every call and
/// the only I/O is the delegate's HTTP request.
pub struct Dispatcher {
    settings: Arc<dyn BotSettings>,
    delegate: Arc<dyn Delegate>,
    interpreter: Interpreter,
    clock: Clock,
}

/// Messages from the bot itself, or from anything that looks like a bot.
pub fn is_own_message(actor_id: &str, bot_name: &str) -> bool {
    let actor = actor_id.to_lowercase();
    actor == bot_name.to_lowercase() || actor.contains("bot")
}

impl Dispatcher {
    pub fn new(settings: Arc<dyn BotSettings>, delegate: Arc<dyn Delegate>) -> Self {
        Self {
            settings,
            delegate,
            interpreter: Arc::new(commands::interpret),
            clock: Arc::new(|| chrono::Local::now().fixed_offset()),
        }
    }

    pub fn with_interpreter(mut self, interpreter: Interpreter) -> Self {
        self.interpreter = interpreter;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &Arc<dyn BotSettings> {
        &self.settings
    }

    /// Handle a chat message from the native or webhook ingress.
    pub async fn handle_message(&self, event: &MessageEvent) -> Replies {
        let config = self.settings.snapshot();
        if !config.enabled {
            debug!("Bot disabled, ignoring message {}", event.id);
            return Replies::none();
        }
        self.dispatch_message(event, &config).await
    }

    /// Handle a bot invocation: messages, reactions, joins and leaves.
    pub async fn handle_invocation(&self, event: &InvocationEvent) -> Replies {
        let config = self.settings.snapshot();
        if !config.enabled {
            debug!("Bot disabled, ignoring invocation");
            return Replies::none();
        }

        match event {
            InvocationEvent::Message(message) => self.dispatch_message(message, &config).await,
            InvocationEvent::Reaction { emoji, .. } => match responder::mirrored_reaction(emoji) {
                Some(emoji) => Replies::reaction(emoji),
                None => Replies::none(),
            },
            InvocationEvent::Join { conversation_token } => {
                info!("Joined conversation {}", conversation_token);
                Replies::answer(Responder::Join, responder::join_greeting(&config), false)
            }
            InvocationEvent::Leave { conversation_token } => {
                info!("Left conversation {}", conversation_token);
                Replies::none()
            }
        }
    }

    /// Priority order: external workflow, command, response mode, mention.
    async fn dispatch_message(&self, event: &MessageEvent, config: &BotConfig) -> Replies {
        if !event.is_chat() {
            debug!(
                "Skipping message {} of type {}",
                event.id, event.message_type
            );
            return Replies::none();
        }
        let content = event.content.as_str();
        if content.trim().is_empty() {
            return Replies::none();
        }
        if is_own_message(&event.actor_id, &config.name) {
            debug!("Skipping message {} from {}", event.id, event.actor_id);
            return Replies::none();
        }

        if let Some(response) = self.delegate.delegate(event, config).await {
            if response.is_usable() {
                info!("External workflow answered message {}", event.id);
                return Replies::answer(Responder::External, response.text, true);
            }
        }

        let now = (self.clock)();

        if let Some(line) = strip_command_prefix(content, &config.command_prefix) {
            let text = (self.interpreter)(line, config, &event.actor_display_name, now);
            if !text.is_empty() {
                info!("Command answered message {}", event.id);
                return Replies::answer(Responder::Command, text, true);
            }
        }

        if let Some(text) = responder::resolve(
            config.response_mode,
            content,
            config,
            &event.actor_display_name,
            now,
        ) {
            info!(
                "{} mode answered message {}",
                config.response_mode, event.id
            );
            return Replies::answer(Responder::Mode, text, true);
        }

        if config.auto_response && responder::mentions_bot(content, &config.name) {
            return Replies::answer(Responder::Mention, responder::mention_greeting(config), true);
        }

        Replies::none()
    }
}

fn strip_command_prefix<'a>(content: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return None;
    }
    content.strip_prefix(prefix)
}

/// Run one event's handling, turning a panic into a logged no-op.
///
/// Returns `None` when the handler faulted; ingress adapters map that to
/// "no reply" (chat ingress) or an internal-error result (webhook).
pub async fn guarded<F, T>(context: &str, fut: F) -> Option<T>
where
    F: Future<Output = T>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(value) => Some(value),
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("Fault while handling {}: {}", context, reason);
            None
        }
    }
}
