//! Chat-completion backends.
//!
//! Every backend implements [`AiProvider`]. Which one the application uses is
//! chosen by [`ProviderKind`] in the configuration.

pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::models::internal::Message;

pub use openai::OpenAiProvider;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider configuration error: {0}")]
    Configuration(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to encode request: {0}")]
    Request(#[from] serde_json::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Minimal `{role, content}` shape sent to chat-completion endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(msg: &Message) -> Self {
        Self::new(msg.role.as_str(), msg.content.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
}

/// Validated settings a provider was built from.
#[derive(Clone)]
pub struct ProviderSettings {
    pub api_key: String,
    pub model: String,
    pub default_role: Option<ChatMessage>,
    pub api_base: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("default_role", &self.default_role)
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Per-call request options. `extra` is merged into the request body as-is.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CompletionOptions {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMetadata {
    pub model: String,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub tokens: u32,
    pub metadata: CompletionMetadata,
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Check the configuration this provider needs and extract its settings.
    fn validate_configuration(config: &Config) -> Result<ProviderSettings, ProviderError>
    where
        Self: Sized;

    fn name(&self) -> &'static str;

    fn settings(&self) -> &ProviderSettings;

    /// Does not modify `messages`.
    async fn create_chat_completion(
        &self,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<Completion, ProviderError>;

    fn format_messages(&self, history: &[Message]) -> Vec<ChatMessage> {
        format_messages(history)
    }
}

/// Map stored messages to the wire shape, preserving order.
pub fn format_messages(history: &[Message]) -> Vec<ChatMessage> {
    history.iter().map(ChatMessage::from).collect()
}

pub fn build_provider(
    kind: ProviderKind,
    config: &Config,
) -> Result<Arc<dyn AiProvider>, ProviderError> {
    match kind {
        ProviderKind::OpenAi => Ok(Arc::new(OpenAiProvider::new(config)?)),
    }
}
