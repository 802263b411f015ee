//! Local responders that run when neither the external workflow nor a
//! command produced an answer.

use chrono::{DateTime, FixedOffset};

use crate::config::{BotConfig, ResponseMode};

/// Emoji the bot mirrors back when someone reacts.
pub const REACTION_ALLOW_LIST: [&str; 3] = ["👍", "❤️", "😀"];

/// Keyword table for `auto` mode, matched in order against lowercased content.
fn auto_responses(now: DateTime<FixedOffset>) -> Vec<(&'static str, String)> {
    vec![
        ("привет", "Привет! 👋".to_string()),
        ("hello", "Hello! 👋".to_string()),
        ("спасибо", "Пожалуйста! 😊".to_string()),
        ("thanks", "You're welcome! 😊".to_string()),
        ("как дела", "У меня всё отлично, спасибо за вопрос!".to_string()),
        ("how are you", "I'm doing great, thanks for asking!".to_string()),
        ("время", format!("Текущее время: {}", now.format("%H:%M:%S"))),
        ("time", format!("Current time: {}", now.format("%H:%M:%S"))),
        ("дата", format!("Сегодня: {}", now.format("%d.%m.%Y"))),
        ("date", format!("Today: {}", now.format("%Y-%m-%d"))),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Locale {
    En,
    Ru,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Mention,
    Help(Locale),
    Info(Locale),
}

fn manual_triggers(bot_name: &str) -> Vec<(String, Trigger)> {
    vec![
        (format!("@{}", bot_name.to_lowercase()), Trigger::Mention),
        ("помощь".to_string(), Trigger::Help(Locale::Ru)),
        ("help".to_string(), Trigger::Help(Locale::En)),
        ("info".to_string(), Trigger::Info(Locale::En)),
        ("информация".to_string(), Trigger::Info(Locale::Ru)),
    ]
}

/// Resolve the configured response mode against the message content.
pub fn resolve(
    mode: ResponseMode,
    content: &str,
    config: &BotConfig,
    actor_name: &str,
    now: DateTime<FixedOffset>,
) -> Option<String> {
    match mode {
        ResponseMode::Auto => resolve_auto(content, now),
        ResponseMode::Manual => resolve_manual(content, config, actor_name),
        ResponseMode::Hybrid => resolve_manual(content, config, actor_name)
            .or_else(|| resolve_auto(content, now)),
    }
}

pub fn resolve_auto(content: &str, now: DateTime<FixedOffset>) -> Option<String> {
    let content = content.to_lowercase();
    auto_responses(now)
        .into_iter()
        .find(|(keyword, _)| content.contains(keyword))
        .map(|(_, response)| response)
}

pub fn resolve_manual(content: &str, config: &BotConfig, actor_name: &str) -> Option<String> {
    let content = content.to_lowercase();
    let (_, trigger) = manual_triggers(&config.name)
        .into_iter()
        .find(|(needle, _)| content.contains(needle.as_str()))?;

    let actor = if actor_name.is_empty() { "there" } else { actor_name };
    let text = match trigger {
        Trigger::Mention => format!(
            "Hi, {}! I'm {}. Write 'help' to see what I can do.",
            actor, config.name
        ),
        Trigger::Help(locale) => help_message(config, actor, locale),
        Trigger::Info(locale) => info_message(config, locale),
    };
    Some(text)
}

fn help_message(config: &BotConfig, actor: &str, locale: Locale) -> String {
    let prefix = &config.command_prefix;
    let name = &config.name;
    match locale {
        Locale::En => format!(
            "Hi, {actor}! 🤖\n\n\
             I'm {name}. Here is what I can do:\n\n\
             **Commands:**\n\
             • {prefix}about - information about the bot\n\n\
             **Auto replies:**\n\
             Just write 'hello', 'thanks' or 'how are you' and I'll answer!\n\n\
             Mention me as @{name} to get my attention."
        ),
        Locale::Ru => format!(
            "Привет, {actor}! 🤖\n\n\
             Я бот {name}. Вот что я умею:\n\n\
             **Команды:**\n\
             • {prefix}about - информация о боте\n\n\
             **Автоответы:**\n\
             Просто напишите 'привет', 'спасибо' или 'как дела', и я отвечу!\n\n\
             Упомяните меня @{name} для привлечения внимания."
        ),
    }
}

fn info_message(config: &BotConfig, locale: Locale) -> String {
    let features = config
        .features
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    match locale {
        Locale::En => format!(
            "ℹ️ **Bot information:**\n\n\
             **Name:** {}\n\
             **Description:** {}\n\
             **Command prefix:** {}\n\
             **Response mode:** {}\n\
             **Features:** {}",
            config.name, config.description, config.command_prefix, config.response_mode, features
        ),
        Locale::Ru => format!(
            "ℹ️ **Информация о боте:**\n\n\
             **Название:** {}\n\
             **Описание:** {}\n\
             **Префикс команд:** {}\n\
             **Режим ответов:** {}\n\
             **Возможности:** {}",
            config.name, config.description, config.command_prefix, config.response_mode, features
        ),
    }
}

/// Whether the content names the bot, with or without a leading `@`.
pub fn mentions_bot(content: &str, bot_name: &str) -> bool {
    !bot_name.is_empty() && content.to_lowercase().contains(&bot_name.to_lowercase())
}

pub fn mention_greeting(config: &BotConfig) -> String {
    format!(
        "Hi! I'm {}. Use `{}help` for the list of commands.",
        config.name, config.command_prefix
    )
}

pub fn join_greeting(config: &BotConfig) -> String {
    format!(
        "👋 Hi! I'm {}. Use `{}help` for the list of available commands.",
        config.name, config.command_prefix
    )
}

pub fn mirrored_reaction(emoji: &str) -> Option<String> {
    REACTION_ALLOW_LIST
        .contains(&emoji)
        .then(|| emoji.to_string())
}
