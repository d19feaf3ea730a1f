use std::path::Path;

use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;
use validator::{Validate, ValidationError};

use crate::providers::{ChatMessage, ProviderKind};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration source error: {0}")]
    Source(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
    #[error("OPENAI_DEFAULT_ROLE is not a valid {{\"role\", \"content\"}} object: {0}")]
    DefaultRole(#[from] serde_json::Error),
}

/// Main configuration for the assistant
#[derive(Deserialize, Validate, Clone)]
pub struct Config {
    /// Database URL (SeaORM / SQLite)
    pub database_url: String,

    /// Maximum database connections
    #[validate(range(min = 1, max = 100))]
    pub max_connections: u32,

    /// Log level (e.g., info, debug, trace)
    pub log_level: String,

    /// UTC offset used when rendering local timestamps, e.g. "+02:00"
    #[validate(custom(function = "validate_time_zone"))]
    pub time_zone: String,

    /// Which completion backend to build
    pub provider: ProviderKind,

    pub openai_api_key: Option<String>,

    pub openai_model: Option<String>,

    /// Message inserted ahead of every outgoing history, e.g.
    /// `{"role": "developer", "content": "You are a helpful assistant."}`
    pub openai_default_role: Option<ChatMessage>,

    pub openai_api_base: String,

    #[validate(range(min = 1))]
    pub openai_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://ai-assistant.db".to_string(),
            max_connections: 5,
            log_level: "info".to_string(),
            time_zone: "+00:00".to_string(),
            provider: ProviderKind::OpenAi,
            openai_api_key: None,
            openai_model: None,
            openai_default_role: None,
            openai_api_base: "https://api.openai.com".to_string(),
            openai_timeout_secs: 600,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url)
            .field("max_connections", &self.max_connections)
            .field("log_level", &self.log_level)
            .field("time_zone", &self.time_zone)
            .field("provider", &self.provider)
            .field(
                "openai_api_key",
                &self.openai_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("openai_model", &self.openai_model)
            .field("openai_default_role", &self.openai_default_role)
            .field("openai_api_base", &self.openai_api_base)
            .field("openai_timeout_secs", &self.openai_timeout_secs)
            .finish()
    }
}

impl Config {
    /// Load from defaults, `~/.ai-assistant/config`, `ASSISTANT__*` and the
    /// plain `OPENAI_*` variables, in increasing precedence.
    pub fn load() -> Result<Self, ConfigError> {
        let home = dirs::home_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ".".to_string());
        let file = config::File::with_name(&format!("{home}/.ai-assistant/config")).required(false);

        Self::load_with(file)
    }

    /// Same layering as [`Config::load`] but reading an explicit file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with(config::File::from(path).required(true))
    }

    /// Defaults plus a TOML document, no environment involved.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let settings = Self::defaults()?
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?;

        Self::finish(settings)
    }

    fn load_with<T>(file: T) -> Result<Self, ConfigError>
    where
        T: config::Source + Send + Sync + 'static,
    {
        let default_role = match std::env::var("OPENAI_DEFAULT_ROLE") {
            Ok(raw) if !raw.trim().is_empty() => Some(serde_json::from_str::<ChatMessage>(&raw)?),
            _ => None,
        };

        let mut builder = Self::defaults()?
            .add_source(file)
            // Environment overrides: ASSISTANT__DATABASE_URL, ASSISTANT__OPENAI_MODEL, etc.
            .add_source(config::Environment::with_prefix("ASSISTANT").separator("__"))
            .set_override_option("openai_api_key", std::env::var("OPENAI_API_KEY").ok())?
            .set_override_option("openai_model", std::env::var("OPENAI_MODEL").ok())?;

        if let Some(role) = default_role {
            builder = builder
                .set_override("openai_default_role.role", role.role)?
                .set_override("openai_default_role.content", role.content)?;
        }

        Self::finish(builder.build()?)
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        let d = Config::default();
        Ok(config::Config::builder()
            .set_default("database_url", d.database_url)?
            .set_default("max_connections", d.max_connections)?
            .set_default("log_level", d.log_level)?
            .set_default("time_zone", d.time_zone)?
            .set_default("provider", "openai")?
            .set_default("openai_api_base", d.openai_api_base)?
            .set_default("openai_timeout_secs", d.openai_timeout_secs)?)
    }

    fn finish(settings: config::Config) -> Result<Self, ConfigError> {
        let cfg: Config = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// The configured UTC offset. Falls back to UTC for values that never
    /// went through validation (e.g. hand-built configs).
    pub fn time_zone_offset(&self) -> FixedOffset {
        parse_offset(&self.time_zone).unwrap_or_else(|| Utc.fix())
    }
}

fn parse_offset(raw: &str) -> Option<FixedOffset> {
    match raw.trim() {
        "UTC" | "Z" | "utc" => Some(Utc.fix()),
        other => other.parse::<FixedOffset>().ok(),
    }
}

fn validate_time_zone(raw: &str) -> Result<(), ValidationError> {
    if parse_offset(raw).is_some() {
        Ok(())
    } else {
        Err(ValidationError::new("time_zone"))
    }
}
