mod commands;
mod config;
mod dispatch;
mod external;
mod platform;
mod responder;
mod server;
mod webhook;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{BotSettings, FileSettings};
use crate::dispatch::Dispatcher;
use crate::external::WebhookClient;
use crate::platform::talk::TalkClient;
use crate::platform::{LogSink, ReplySink};
use crate::server::AppState;
use crate::webhook::{HmacVerifier, WebhookService};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,talkbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.first().map(String::as_str) == Some("--test-command") {
        let command = args
            .get(1)
            .context("Usage: talkbot --test-command <command> [config.toml]")?;
        let settings = open_settings(args.get(2))?;
        return test_command(&settings, command);
    }

    let settings = Arc::new(open_settings(args.first())?);
    let config = settings.config();

    info!("Configuration loaded successfully");
    info!("  Bot: {} (enabled: {})", config.bot.name, config.bot.enabled);
    info!("  Response mode: {}", config.bot.response_mode);
    info!(
        "  External integration: {}",
        if config.external.enabled {
            config.external.webhook_url.as_str()
        } else {
            "disabled"
        }
    );

    let initialized = settings.is_configured();
    if !initialized {
        warn!("Bot is not properly configured; events will be ignored until it is enabled");
    }

    let settings: Arc<dyn BotSettings> = settings;
    let delegate = Arc::new(WebhookClient::new(&config.external)?);
    let dispatcher = Arc::new(Dispatcher::new(settings.clone(), delegate));

    let sink: Arc<dyn ReplySink> = match config.talk.base_url.as_deref() {
        Some(base_url) if !base_url.is_empty() => {
            info!("  Delivering replies to {}", base_url);
            Arc::new(TalkClient::new(base_url, &config.talk, settings.clone())?)
        }
        _ => Arc::new(LogSink),
    };

    let webhook = Arc::new(WebhookService::new(
        dispatcher.clone(),
        sink.clone(),
        Arc::new(HmacVerifier::new(settings)),
        config.webhook.require_signature,
    ));

    let state = AppState {
        dispatcher,
        webhook,
        sink,
        initialized,
    };

    info!("Bot is starting...");
    server::serve(&config.server.bind, state).await
}

fn open_settings(path: Option<&String>) -> Result<FileSettings> {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    FileSettings::open(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))
}

/// Run one command through the interpreter and print the answer.
fn test_command(settings: &FileSettings, command: &str) -> Result<()> {
    let config = settings.snapshot();

    println!("Testing bot configuration...");
    println!("Bot enabled: {}", if config.enabled { "yes" } else { "no" });
    println!("Bot name: {}", config.name);
    println!("Command prefix: {}", config.command_prefix);
    println!();
    println!("Testing command: {}", command);

    let response = commands::interpret(
        command,
        &config,
        "Admin User",
        chrono::Local::now().fixed_offset(),
    );

    println!();
    println!("Bot response:");
    println!("{}", response);
    Ok(())
}
