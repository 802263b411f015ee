use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::info;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    #[default]
    Auto,
    Manual,
    Hybrid,
}

impl std::fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseMode::Auto => write!(f, "auto"),
            ResponseMode::Manual => write!(f, "manual"),
            ResponseMode::Hybrid => write!(f, "hybrid"),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bot: BotSection,
    #[serde(default)]
    pub external: ExternalConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub talk: TalkConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BotSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bot_name")]
    pub name: String,
    #[serde(default = "default_description")]
    pub description: String,
    /// Installation secret. Left empty in a fresh config and filled in on first read.
    #[serde(default)]
    pub secret: String,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    #[serde(default)]
    pub response_mode: ResponseMode,
    #[serde(default = "default_true")]
    pub auto_response: bool,
    #[serde(default = "default_features")]
    pub features: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExternalConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub webhook_url: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct WebhookConfig {
    /// Reject webhook calls that carry no signature header at all.
    #[serde(default)]
    pub require_signature: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TalkConfig {
    /// Nextcloud base URL used to deliver replies through the bot API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_bind() -> String {
    "127.0.0.1:8719".to_string()
}

fn default_bot_name() -> String {
    "NextcloudBot".to_string()
}

fn default_description() -> String {
    "Helpful bot for Nextcloud Talk".to_string()
}

fn default_command_prefix() -> String {
    "!".to_string()
}

fn default_true() -> bool {
    true
}

fn default_features() -> Vec<String> {
    vec![
        "webhook".to_string(),
        "response".to_string(),
        "event".to_string(),
    ]
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for BotSection {
    fn default() -> Self {
        Self {
            enabled: false,
            name: default_bot_name(),
            description: default_description(),
            secret: String::new(),
            command_prefix: default_command_prefix(),
            response_mode: ResponseMode::default(),
            auto_response: true,
            features: default_features(),
        }
    }
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: String::new(),
            connect_timeout_secs: default_connect_timeout_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for TalkConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }
}

/// Read-only snapshot of the bot settings, taken once per event.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub enabled: bool,
    pub name: String,
    pub description: String,
    pub secret: String,
    pub command_prefix: String,
    pub response_mode: ResponseMode,
    pub auto_response: bool,
    pub features: BTreeSet<String>,
    pub external_integration_enabled: bool,
    pub external_webhook_url: String,
}

/// Accessor the core reads bot settings through.
///
/// Every getter is synchronous and side-effect free, except `secret`, which
/// creates and persists the installation secret the first time it is needed.
pub trait BotSettings: Send + Sync {
    fn is_enabled(&self) -> bool;
    fn name(&self) -> String;
    fn description(&self) -> String;
    fn secret(&self) -> String;
    fn command_prefix(&self) -> String;
    fn response_mode(&self) -> ResponseMode;
    fn auto_response(&self) -> bool;
    fn is_external_integration_enabled(&self) -> bool;
    fn external_webhook_url(&self) -> String;
    fn features(&self) -> Vec<String>;

    fn is_configured(&self) -> bool {
        self.is_enabled() && !self.name().is_empty() && !self.secret().is_empty()
    }

    fn snapshot(&self) -> BotConfig {
        BotConfig {
            enabled: self.is_enabled(),
            name: self.name(),
            description: self.description(),
            secret: self.secret(),
            command_prefix: self.command_prefix(),
            response_mode: self.response_mode(),
            auto_response: self.auto_response(),
            features: self.features().into_iter().collect(),
            external_integration_enabled: self.is_external_integration_enabled(),
            external_webhook_url: self.external_webhook_url(),
        }
    }
}

/// 64 hex characters built from two random v4 UUIDs.
pub fn generate_secret() -> String {
    format!(
        "{}{}",
        uuid::Uuid::new_v4().simple(),
        uuid::Uuid::new_v4().simple()
    )
}

/// Bot settings backed by the TOML config file.
pub struct FileSettings {
    path: PathBuf,
    config: RwLock<Config>,
}

impl FileSettings {
    pub fn open(path: &Path) -> Result<Self> {
        let config = Config::load(path)?;
        Ok(Self::new(path.to_path_buf(), config))
    }

    pub fn new(path: PathBuf, config: Config) -> Self {
        Self {
            path,
            config: RwLock::new(config),
        }
    }

    /// Copy of the full config, for the parts that live outside `[bot]`.
    pub fn config(&self) -> Config {
        self.read(|c| c.clone())
    }

    fn read<T>(&self, f: impl FnOnce(&Config) -> T) -> T {
        let guard = self.config.read().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    /// Generates the secret under the write lock so concurrent first reads
    /// agree, then writes the file after the lock is released.
    ///
    /// The write is blocking file I/O on the caller's thread. It happens at
    /// most once per installation.
    fn init_secret(&self) -> Result<String> {
        let (secret, to_save) = {
            let mut guard = self.config.write().unwrap_or_else(|e| e.into_inner());
            if !guard.bot.secret.is_empty() {
                return Ok(guard.bot.secret.clone());
            }
            guard.bot.secret = generate_secret();
            (guard.bot.secret.clone(), guard.clone())
        };
        to_save.save(&self.path)?;
        info!("Generated bot secret and saved it to {}", self.path.display());
        Ok(secret)
    }
}

impl BotSettings for FileSettings {
    fn is_enabled(&self) -> bool {
        self.read(|c| c.bot.enabled)
    }

    fn name(&self) -> String {
        self.read(|c| c.bot.name.clone())
    }

    fn description(&self) -> String {
        self.read(|c| c.bot.description.clone())
    }

    fn secret(&self) -> String {
        let existing = self.read(|c| c.bot.secret.clone());
        if !existing.is_empty() {
            return existing;
        }
        match self.init_secret() {
            Ok(secret) => secret,
            Err(e) => {
                // Keep the generated value in memory even if the file could not be written.
                tracing::error!("Failed to persist bot secret: {:#}", e);
                self.read(|c| c.bot.secret.clone())
            }
        }
    }

    fn command_prefix(&self) -> String {
        self.read(|c| c.bot.command_prefix.clone())
    }

    fn response_mode(&self) -> ResponseMode {
        self.read(|c| c.bot.response_mode)
    }

    fn auto_response(&self) -> bool {
        self.read(|c| c.bot.auto_response)
    }

    fn is_external_integration_enabled(&self) -> bool {
        self.read(|c| c.external.enabled)
    }

    fn external_webhook_url(&self) -> String {
        self.read(|c| c.external.webhook_url.clone())
    }

    fn features(&self) -> Vec<String> {
        self.read(|c| c.bot.features.clone())
    }
}
