pub mod chat_service;

// Re-export for convenience
pub use chat_service::{ChatService, Exchange, ServiceError};
