pub mod db;
pub mod entities;
pub mod migrations;
pub mod repository;

pub use db::{init_db, init_db_with, migration_status};
pub use entities::{conversations, messages, users};
pub use repository::{ConversationRepository, RepositoryError, SeaOrmConversationRepository};
