//! AI Assistant - persistent chat conversations backed by an LLM provider

pub mod cli;
pub mod config;
pub mod models;
pub mod providers;
pub mod services;
pub mod storage;

// Re-export main types for convenience
pub use crate::config::Config;
pub use crate::models::internal::{
    Conversation, Message, MessageStatus, NewConversation, NewMessage, NewUser, Role,
    SoftDeletable, SoftDelete, User,
};
pub use crate::providers::{
    build_provider, AiProvider, ChatMessage, Completion, CompletionOptions, OpenAiProvider,
    ProviderError, ProviderKind,
};
pub use crate::services::{ChatService, Exchange, ServiceError};
pub use crate::storage::db::init_db;
pub use crate::storage::repository::{
    ConversationRepository, RepositoryError, SeaOrmConversationRepository,
};
