//! Built-in chat commands.
//!
//! Interpretation is pure: the caller supplies the config snapshot and the
//! current time, nothing here touches the network or the config store.

use chrono::{DateTime, FixedOffset};

use crate::config::BotConfig;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub args: Vec<String>,
}

impl Command {
    /// Split on whitespace. The first token, lowercased, names the command.
    pub fn parse(line: &str) -> Self {
        let mut tokens = line.split_whitespace();
        let name = tokens.next().unwrap_or_default().to_lowercase();
        let args = tokens.map(str::to_string).collect();
        Self { name, args }
    }

    fn is_about(&self) -> bool {
        match self.name.as_str() {
            "about" => true,
            // The localized spelling is two words.
            "о" => self
                .args
                .first()
                .is_some_and(|arg| arg.to_lowercase() == "боте"),
            _ => false,
        }
    }
}

/// Interpret a command line with the prefix already stripped.
pub fn interpret(
    line: &str,
    config: &BotConfig,
    actor_name: &str,
    now: DateTime<FixedOffset>,
) -> String {
    let command = Command::parse(line);
    if command.is_about() {
        about(config, actor_name, now)
    } else {
        unknown(&command.name, config)
    }
}

fn about(config: &BotConfig, actor_name: &str, now: DateTime<FixedOffset>) -> String {
    let on_off = |flag: bool| if flag { "✅ enabled" } else { "❌ disabled" };

    let mut text = format!(
        "**🤖 About {name}**\n\n\
         {description}\n\n\
         **Version:** {VERSION}\n\
         **Platform:** Nextcloud Talk\n\
         **Requested by:** {actor}\n\n\
         **📊 Configuration:**\n\
         • **Name:** {name}\n\
         • **Command prefix:** `{prefix}`\n\
         • **Bot status:** {status}\n\
         • **External integration:** {external}\n",
        name = config.name,
        description = config.description,
        actor = if actor_name.is_empty() { "User" } else { actor_name },
        prefix = config.command_prefix,
        status = on_off(config.enabled),
        external = on_off(config.external_integration_enabled),
    );

    if config.external_integration_enabled && !config.external_webhook_url.is_empty() {
        text.push_str(&format!(
            "• **Webhook URL:** `{}`\n",
            config.external_webhook_url
        ));
    }
    text.push_str(&format!(
        "• **Generated at:** {}",
        now.format("%H:%M:%S %d.%m.%Y")
    ));
    text
}

fn unknown(name: &str, config: &BotConfig) -> String {
    format!(
        "❓ Unknown command: `{}`\nThe only available command is `{}about`, which shows information about the bot.",
        name, config.command_prefix
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::ResponseMode;
    use chrono::TimeZone;

    pub fn bot_config() -> BotConfig {
        BotConfig {
            enabled: true,
            name: "HelpBot".to_string(),
            description: "Helpful bot for Nextcloud Talk".to_string(),
            secret: "secret".to_string(),
            command_prefix: "/".to_string(),
            response_mode: ResponseMode::Auto,
            auto_response: true,
            features: ["webhook".to_string()].into_iter().collect(),
            external_integration_enabled: false,
            external_webhook_url: String::new(),
        }
    }

    pub fn fixed_now() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 3, 14, 15, 9, 26)
            .unwrap()
    }

    #[test]
    fn test_parse_splits_name_and_args() {
        let cmd = Command::parse("  ABOUT  verbose   now ");
        assert_eq!(cmd.name, "about");
        assert_eq!(cmd.args, vec!["verbose", "now"]);

        let empty = Command::parse("");
        assert_eq!(empty.name, "");
        assert!(empty.args.is_empty());
    }

    #[test]
    fn test_about_contains_bot_name() {
        let out = interpret("about", &bot_config(), "Alice", fixed_now());
        assert!(out.contains("HelpBot"));
        assert!(out.contains("Helpful bot for Nextcloud Talk"));
        assert!(out.contains(VERSION));
        assert!(out.contains("✅ enabled"));
        assert!(out.contains("15:09:26 14.03.2026"));
        assert!(!out.contains("Webhook URL"));
    }

    #[test]
    fn test_about_localized_spelling() {
        let expected = interpret("about", &bot_config(), "Alice", fixed_now());
        assert_eq!(
            interpret("о боте", &bot_config(), "Alice", fixed_now()),
            expected
        );
        assert_eq!(
            interpret("О Боте", &bot_config(), "Alice", fixed_now()),
            expected
        );
    }

    #[test]
    fn test_about_shows_external_url_when_enabled() {
        let mut config = bot_config();
        config.external_integration_enabled = true;
        config.external_webhook_url = "https://n8n.example.com/webhook/talk".to_string();
        let out = interpret("about", &config, "Alice", fixed_now());
        assert!(out.contains("`https://n8n.example.com/webhook/talk`"));
    }

    #[test]
    fn test_unknown_command() {
        let out = interpret("xyz", &bot_config(), "Alice", fixed_now());
        assert!(out.contains("`xyz`"));
        assert!(out.contains("`/about`"));
    }

    #[test]
    fn test_lone_word_o_is_unknown() {
        let out = interpret("о", &bot_config(), "Alice", fixed_now());
        assert!(out.starts_with("❓"));
    }
}
