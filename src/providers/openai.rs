use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{
    AiProvider, ChatMessage, Completion, CompletionMetadata, CompletionOptions, ProviderError,
    ProviderSettings,
};
use crate::config::Config;

#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    settings: ProviderSettings,
}

impl OpenAiProvider {
    pub fn new(config: &Config) -> Result<Self, ProviderError> {
        let settings = Self::validate_configuration(config)?;
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;

        tracing::info!(
            "OpenAI provider ready (model {}, base {})",
            settings.model,
            settings.api_base
        );

        Ok(Self { client, settings })
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.settings.api_base.trim_end_matches('/')
        )
    }

    /// Outgoing message list: the default role message (if any) first, then
    /// the caller's messages.
    fn outgoing_messages(&self, messages: &[ChatMessage]) -> Vec<ChatMessage> {
        let mut outgoing = Vec::with_capacity(messages.len() + 1);
        if let Some(role) = &self.settings.default_role {
            outgoing.push(role.clone());
        }
        outgoing.extend_from_slice(messages);
        outgoing
    }
}

fn required(value: &Option<String>, name: &str) -> Result<String, ProviderError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ProviderError::Configuration(format!("{name} is not set"))),
    }
}

/// `extra` may add fields but never replaces `model` or `messages`.
fn request_body(
    model: &str,
    messages: &[ChatMessage],
    options: CompletionOptions,
) -> Result<Value, ProviderError> {
    let mut body: Map<String, Value> = options.extra;

    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert("messages".to_string(), serde_json::to_value(messages)?);
    if let Some(temperature) = options.temperature {
        body.insert("temperature".to_string(), serde_json::json!(temperature));
    }
    if let Some(max_tokens) = options.max_tokens {
        body.insert("max_tokens".to_string(), serde_json::json!(max_tokens));
    }

    Ok(Value::Object(body))
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn validate_configuration(config: &Config) -> Result<ProviderSettings, ProviderError> {
        let api_key = required(&config.openai_api_key, "OPENAI_API_KEY")?;
        let model = required(&config.openai_model, "OPENAI_MODEL")?;

        Ok(ProviderSettings {
            api_key,
            model,
            default_role: config.openai_default_role.clone(),
            api_base: config.openai_api_base.clone(),
            timeout: Duration::from_secs(config.openai_timeout_secs),
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }

    fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    async fn create_chat_completion(
        &self,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<Completion, ProviderError> {
        let model = options
            .model
            .clone()
            .unwrap_or_else(|| self.settings.model.clone());
        let outgoing = self.outgoing_messages(messages);
        let body = request_body(&model, &outgoing, options)?;

        tracing::debug!(
            "Requesting completion from {} ({} messages)",
            model,
            outgoing.len()
        );

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProviderError::Api {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("no choices returned".to_string()))?;

        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            tokens: parsed.usage.map(|u| u.total_tokens).unwrap_or(0),
            metadata: CompletionMetadata {
                model: parsed.model.unwrap_or(model),
                finish_reason: choice.finish_reason,
            },
        })
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u32,
}
