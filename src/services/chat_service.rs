//! Conversation turns against a chat-completion provider.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::models::internal::{
    Conversation, Message, MessageStatus, NewConversation, NewMessage, Role, SoftDeletable,
};
use crate::providers::{AiProvider, CompletionOptions, ProviderError};
use crate::storage::repository::{ConversationRepository, RepositoryError};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// A stored user turn and the assistant reply it produced.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub prompt: Message,
    pub reply: Message,
}

#[derive(Clone)]
pub struct ChatService {
    repo: Arc<dyn ConversationRepository>,
    provider: Arc<dyn AiProvider>,
}

impl ChatService {
    pub fn new(repo: Arc<dyn ConversationRepository>, provider: Arc<dyn AiProvider>) -> Self {
        Self { repo, provider }
    }

    pub async fn start_conversation(
        &self,
        user_id: Uuid,
        title: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Conversation, ServiceError> {
        let mut new_conv = NewConversation::new(user_id);
        if let Some(title) = title {
            new_conv = new_conv.with_title(title);
        }
        if let Some(metadata) = metadata {
            new_conv = new_conv.with_metadata(metadata);
        }

        Ok(self.repo.create_conversation(new_conv).await?)
    }

    pub async fn history(&self, conversation_id: Uuid) -> Result<Vec<Message>, ServiceError> {
        self.active_conversation(conversation_id).await?;
        Ok(self.repo.get_conversation_messages(conversation_id).await?)
    }

    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        content: &str,
        options: CompletionOptions,
    ) -> Result<Exchange, ServiceError> {
        let conversation = self.active_conversation(conversation_id).await?;

        let mut prompt = self
            .repo
            .create_message(NewMessage::new(
                conversation.user_id,
                conversation.id,
                Role::User,
                content,
            ))
            .await?;

        let history = self.repo.get_conversation_messages(conversation.id).await?;
        let formatted = self.provider.format_messages(&history);

        tracing::debug!(
            "Conversation {}: sending {} message(s) to {} (default model {})",
            conversation.id,
            formatted.len(),
            self.provider.name(),
            self.provider.settings().model
        );

        let completion = match self
            .provider
            .create_chat_completion(&formatted, options)
            .await
        {
            Ok(completion) => completion,
            Err(e) => {
                tracing::warn!(
                    "Completion via {} failed for conversation {}: {}",
                    self.provider.name(),
                    conversation.id,
                    e
                );
                if let Err(status_err) = self
                    .repo
                    .update_message_status(&mut prompt, MessageStatus::Error)
                    .await
                {
                    tracing::error!(
                        "Failed to mark message {} as error: {}",
                        prompt.id,
                        status_err
                    );
                }
                return Err(e.into());
            }
        };

        self.repo
            .update_message_status(&mut prompt, MessageStatus::Completed)
            .await?;

        let reply = self
            .repo
            .create_message(
                NewMessage::new(
                    conversation.user_id,
                    conversation.id,
                    Role::Assistant,
                    completion.content,
                )
                .with_status(MessageStatus::Completed)
                .with_tokens(completion.tokens)
                .with_metadata(json!({
                    "model": completion.metadata.model,
                    "finish_reason": completion.metadata.finish_reason,
                })),
            )
            .await?;

        tracing::info!(
            "Conversation {}: reply {} ({} tokens)",
            conversation.id,
            reply.id,
            reply.tokens
        );

        Ok(Exchange { prompt, reply })
    }

    async fn active_conversation(&self, id: Uuid) -> Result<Conversation, ServiceError> {
        match self.repo.find_conversation(id).await? {
            Some(conv) if !conv.is_deleted() => Ok(conv),
            _ => Err(ServiceError::NotFound(format!("Conversation {}", id))),
        }
    }
}
