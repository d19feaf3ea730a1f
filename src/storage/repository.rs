use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Offset, SubsecRound, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{
    sea_query::Expr, ActiveValue::Unchanged, ConnectionTrait, DatabaseTransaction,
    PaginatorTrait, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;
use validator::Validate;

use crate::models::internal::{
    Conversation, Message, MessageStatus, NewConversation, NewMessage, NewUser, SoftDeletable,
    SoftDelete, User,
};
use crate::storage::entities::{conversations, messages, users};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    DbError(#[from] sea_orm::DbErr),
    #[error("Entity not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<validator::ValidationErrors> for RepositoryError {
    fn from(err: validator::ValidationErrors) -> Self {
        RepositoryError::InvalidInput(err.to_string())
    }
}

/// Timestamps are kept at microsecond precision so values survive a
/// round trip through the database unchanged.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

// ============================================
// TRAIT DEFINITION - with Send + Sync bounds
// ============================================
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn create_user(&self, user: NewUser) -> Result<User, RepositoryError>;
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError>;

    /// Derives the title (when empty) and seeds `last_activity` with the
    /// creation time.
    async fn create_conversation(
        &self,
        conv: NewConversation,
    ) -> Result<Conversation, RepositoryError>;

    /// Writes title, metadata and `last_activity` as given. Never re-derives
    /// the title.
    async fn save_conversation(&self, conv: &Conversation)
        -> Result<Conversation, RepositoryError>;

    async fn find_conversation(&self, id: Uuid) -> Result<Option<Conversation>, RepositoryError>;

    /// Active conversations for a user, most recently active first.
    async fn list_conversations(&self, user_id: Uuid)
        -> Result<Vec<Conversation>, RepositoryError>;

    async fn list_conversations_with_deleted(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Conversation>, RepositoryError>;

    async fn soft_delete_conversation(&self, conv: &mut Conversation)
        -> Result<(), RepositoryError>;
    async fn restore_conversation(&self, conv: &mut Conversation) -> Result<(), RepositoryError>;

    /// Permanently removes the conversation and every message in it.
    async fn hard_delete_conversation(&self, id: Uuid) -> Result<(), RepositoryError>;

    /// Inserts the message and moves the conversation's `last_activity` to
    /// the message timestamp, atomically.
    async fn create_message(&self, msg: NewMessage) -> Result<Message, RepositoryError>;

    /// Writes every mutable field and, like creation, stamps the parent
    /// conversation with this message's timestamp. Re-saving an old message
    /// therefore moves `last_activity` back to that message's time.
    async fn save_message(&self, msg: &Message) -> Result<Message, RepositoryError>;

    async fn update_message_status(
        &self,
        msg: &mut Message,
        status: MessageStatus,
    ) -> Result<(), RepositoryError>;

    async fn find_message_by_id(&self, id: Uuid) -> Result<Option<Message>, RepositoryError>;

    /// Active messages in chronological order.
    async fn get_conversation_messages(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn get_conversation_messages_with_deleted(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<Message>, RepositoryError>;

    /// The last `limit` active messages, still in chronological order.
    async fn find_recent_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError>;

    async fn count_messages_in_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<u64, RepositoryError>;

    async fn soft_delete_message(&self, msg: &mut Message) -> Result<(), RepositoryError>;
    async fn restore_message(&self, msg: &mut Message) -> Result<(), RepositoryError>;
}

// ============================================
// IMPLEMENTATION STRUCT
// ============================================
pub struct SeaOrmConversationRepository {
    db: DatabaseConnection,
    time_zone: FixedOffset,
}

impl SeaOrmConversationRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            time_zone: Utc.fix(),
        }
    }

    /// Offset used to render auto-generated titles.
    pub fn with_time_zone(mut self, time_zone: FixedOffset) -> Self {
        self.time_zone = time_zone;
        self
    }
}

// ============================================
// TRAIT IMPLEMENTATION
// ============================================
#[async_trait]
impl ConversationRepository for SeaOrmConversationRepository {
    async fn create_user(&self, user: NewUser) -> Result<User, RepositoryError> {
        user.validate()?;

        let model = users::ActiveModel {
            id: Set(Uuid::new_v4()),
            username: Set(user.username),
            email: Set(user.email),
            created_at: Set(now()),
        }
        .insert(&self.db)
        .await?;

        tracing::info!("Created user: {}", model.id);
        Ok(User::from(model))
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, RepositoryError> {
        let model = users::Entity::find_by_id(id).one(&self.db).await?;
        Ok(model.map(User::from))
    }

    async fn create_conversation(
        &self,
        conv: NewConversation,
    ) -> Result<Conversation, RepositoryError> {
        conv.validate()?;

        let created_at = now();
        let title = match conv.title {
            Some(title) if !title.is_empty() => title,
            _ => Conversation::default_title(created_at, &self.time_zone),
        };

        let model = conversations::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(conv.user_id),
            title: Set(title),
            created_at: Set(created_at),
            last_activity: Set(Some(created_at)),
            metadata: Set(conv.metadata),
            deleted_at: Set(None),
        }
        .insert(&self.db)
        .await?;

        tracing::info!("Created conversation: {} ({})", model.id, model.title);
        Ok(Conversation::from(model))
    }

    async fn save_conversation(
        &self,
        conv: &Conversation,
    ) -> Result<Conversation, RepositoryError> {
        if conv.title.chars().count() > 255 {
            return Err(RepositoryError::InvalidInput(
                "title: must be at most 255 characters".to_string(),
            ));
        }

        let active_model = conversations::ActiveModel {
            id: Unchanged(conv.id),
            title: Set(conv.title.clone()),
            last_activity: Set(conv.last_activity),
            metadata: Set(conv.metadata.clone()),
            deleted_at: Set(conv.soft_delete.deleted_at),
            ..Default::default()
        };

        let model = active_model
            .update(&self.db)
            .await
            .map_err(|e| not_found_on_missing(e, "Conversation", conv.id))?;

        Ok(Conversation::from(model))
    }

    async fn find_conversation(&self, id: Uuid) -> Result<Option<Conversation>, RepositoryError> {
        let model = conversations::Entity::find_by_id(id).one(&self.db).await?;
        Ok(model.map(Conversation::from))
    }

    async fn list_conversations(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let models = conversations::Entity::find()
            .filter(conversations::Column::UserId.eq(user_id))
            .filter(conversations::Column::DeletedAt.is_null())
            .order_by_desc(conversations::Column::LastActivity)
            .order_by_desc(conversations::Column::CreatedAt)
            .all(&self.db)
            .await?;

        Ok(models.into_iter().map(Conversation::from).collect())
    }

    async fn list_conversations_with_deleted(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let models = conversations::Entity::find()
            .filter(conversations::Column::UserId.eq(user_id))
            .order_by_desc(conversations::Column::LastActivity)
            .order_by_desc(conversations::Column::CreatedAt)
            .all(&self.db)
            .await?;

        Ok(models.into_iter().map(Conversation::from).collect())
    }

    async fn soft_delete_conversation(
        &self,
        conv: &mut Conversation,
    ) -> Result<(), RepositoryError> {
        let mut next = conv.soft_delete;
        next.mark_deleted(now());
        self.write_conversation_deleted_at(conv, next).await
    }

    async fn restore_conversation(&self, conv: &mut Conversation) -> Result<(), RepositoryError> {
        let mut next = conv.soft_delete;
        next.restore();
        self.write_conversation_deleted_at(conv, next).await
    }

    async fn hard_delete_conversation(&self, id: Uuid) -> Result<(), RepositoryError> {
        let txn = self.db.begin().await?;

        let removed = messages::Entity::delete_many()
            .filter(messages::Column::ConversationId.eq(id))
            .exec(&txn)
            .await?;

        let result = conversations::Entity::delete_by_id(id).exec(&txn).await?;
        if result.rows_affected == 0 {
            rollback(txn).await;
            return Err(RepositoryError::NotFound(format!("Conversation {}", id)));
        }

        txn.commit().await?;
        tracing::info!(
            "Deleted conversation {} and {} message(s)",
            id,
            removed.rows_affected
        );
        Ok(())
    }

    async fn create_message(&self, msg: NewMessage) -> Result<Message, RepositoryError> {
        let txn = self.db.begin().await?;

        match insert_message(&txn, msg).await {
            Ok(model) => {
                txn.commit().await?;
                tracing::debug!(
                    "Stored {} message {} in conversation {}",
                    model.role,
                    model.id,
                    model.conversation_id
                );
                Ok(Message::from(model))
            }
            Err(e) => {
                rollback(txn).await;
                Err(e)
            }
        }
    }

    async fn save_message(&self, msg: &Message) -> Result<Message, RepositoryError> {
        let txn = self.db.begin().await?;

        match update_message(&txn, msg).await {
            Ok(model) => {
                txn.commit().await?;
                Ok(Message::from(model))
            }
            Err(e) => {
                rollback(txn).await;
                Err(e)
            }
        }
    }

    async fn update_message_status(
        &self,
        msg: &mut Message,
        status: MessageStatus,
    ) -> Result<(), RepositoryError> {
        let mut next = msg.clone();
        next.status = status;
        *msg = self.save_message(&next).await?;
        Ok(())
    }

    async fn find_message_by_id(&self, id: Uuid) -> Result<Option<Message>, RepositoryError> {
        let model = messages::Entity::find_by_id(id).one(&self.db).await?;
        Ok(model.map(Message::from))
    }

    async fn get_conversation_messages(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<Message>, RepositoryError> {
        let models = messages::Entity::find()
            .filter(messages::Column::ConversationId.eq(conversation_id))
            .filter(messages::Column::DeletedAt.is_null())
            .order_by_asc(messages::Column::Timestamp)
            .all(&self.db)
            .await?;

        Ok(models.into_iter().map(Message::from).collect())
    }

    async fn get_conversation_messages_with_deleted(
        &self,
        conversation_id: Uuid,
    ) -> Result<Vec<Message>, RepositoryError> {
        let models = messages::Entity::find()
            .filter(messages::Column::ConversationId.eq(conversation_id))
            .order_by_asc(messages::Column::Timestamp)
            .all(&self.db)
            .await?;

        Ok(models.into_iter().map(Message::from).collect())
    }

    async fn find_recent_messages(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let models = messages::Entity::find()
            .filter(messages::Column::ConversationId.eq(conversation_id))
            .filter(messages::Column::DeletedAt.is_null())
            .order_by_desc(messages::Column::Timestamp)
            .limit(limit as u64)
            .all(&self.db)
            .await?;

        Ok(models.into_iter().rev().map(Message::from).collect())
    }

    async fn count_messages_in_conversation(
        &self,
        conversation_id: Uuid,
    ) -> Result<u64, RepositoryError> {
        let count = messages::Entity::find()
            .filter(messages::Column::ConversationId.eq(conversation_id))
            .filter(messages::Column::DeletedAt.is_null())
            .count(&self.db)
            .await?;
        Ok(count)
    }

    async fn soft_delete_message(&self, msg: &mut Message) -> Result<(), RepositoryError> {
        let mut next = msg.soft_delete;
        next.mark_deleted(now());
        self.write_message_deleted_at(msg, next).await
    }

    async fn restore_message(&self, msg: &mut Message) -> Result<(), RepositoryError> {
        let mut next = msg.soft_delete;
        next.restore();
        self.write_message_deleted_at(msg, next).await
    }
}

// ============================================
// Helpers: single-column soft delete writes
// ============================================
impl SeaOrmConversationRepository {
    async fn write_conversation_deleted_at(
        &self,
        conv: &mut Conversation,
        next: SoftDelete,
    ) -> Result<(), RepositoryError> {
        let result = conversations::Entity::update_many()
            .col_expr(
                conversations::Column::DeletedAt,
                Expr::value(next.deleted_at),
            )
            .filter(conversations::Column::Id.eq(conv.id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(RepositoryError::NotFound(format!("Conversation {}", conv.id)));
        }

        *conv.soft_delete_state_mut() = next;
        tracing::debug!(
            "Conversation {} deleted_at -> {:?}",
            conv.id,
            conv.deleted_at()
        );
        Ok(())
    }

    async fn write_message_deleted_at(
        &self,
        msg: &mut Message,
        next: SoftDelete,
    ) -> Result<(), RepositoryError> {
        let result = messages::Entity::update_many()
            .col_expr(messages::Column::DeletedAt, Expr::value(next.deleted_at))
            .filter(messages::Column::Id.eq(msg.id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(RepositoryError::NotFound(format!("Message {}", msg.id)));
        }

        *msg.soft_delete_state_mut() = next;
        tracing::debug!("Message {} deleted_at -> {:?}", msg.id, msg.deleted_at());
        Ok(())
    }
}

// ============================================
// Helpers: message writes inside a transaction
// ============================================
async fn insert_message(
    txn: &DatabaseTransaction,
    msg: NewMessage,
) -> Result<messages::Model, RepositoryError> {
    ensure_conversation(txn, msg.conversation_id).await?;

    let model = messages::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(msg.user_id),
        conversation_id: Set(msg.conversation_id),
        role: Set(msg.role),
        content: Set(msg.content),
        tokens: Set(msg.tokens),
        metadata: Set(msg.metadata),
        timestamp: Set(now()),
        status: Set(msg.status),
        deleted_at: Set(None),
    }
    .insert(txn)
    .await?;

    touch_conversation(txn, model.conversation_id, model.timestamp).await?;
    Ok(model)
}

async fn update_message(
    txn: &DatabaseTransaction,
    msg: &Message,
) -> Result<messages::Model, RepositoryError> {
    ensure_conversation(txn, msg.conversation_id).await?;

    let active_model = messages::ActiveModel {
        id: Unchanged(msg.id),
        role: Set(msg.role),
        content: Set(msg.content.clone()),
        tokens: Set(msg.tokens),
        metadata: Set(msg.metadata.clone()),
        status: Set(msg.status),
        deleted_at: Set(msg.soft_delete.deleted_at),
        ..Default::default()
    };

    let model = active_model
        .update(txn)
        .await
        .map_err(|e| not_found_on_missing(e, "Message", msg.id))?;

    touch_conversation(txn, model.conversation_id, model.timestamp).await?;
    Ok(model)
}

async fn ensure_conversation<C>(db: &C, id: Uuid) -> Result<(), RepositoryError>
where
    C: ConnectionTrait,
{
    let exists = conversations::Entity::find_by_id(id)
        .select_only()
        .column(conversations::Column::Id)
        .into_tuple::<Uuid>()
        .one(db)
        .await?
        .is_some();

    if exists {
        Ok(())
    } else {
        Err(RepositoryError::NotFound(format!("Conversation {}", id)))
    }
}

/// Moves `last_activity` only; other conversation columns are untouched.
async fn touch_conversation<C>(
    db: &C,
    conversation_id: Uuid,
    at: DateTime<Utc>,
) -> Result<(), RepositoryError>
where
    C: ConnectionTrait,
{
    conversations::Entity::update_many()
        .col_expr(conversations::Column::LastActivity, Expr::value(Some(at)))
        .filter(conversations::Column::Id.eq(conversation_id))
        .exec(db)
        .await?;
    Ok(())
}

async fn rollback(txn: DatabaseTransaction) {
    if let Err(rollback_err) = txn.rollback().await {
        tracing::error!("Transaction rollback failed: {}", rollback_err);
    }
}

fn not_found_on_missing(err: DbErr, entity: &str, id: Uuid) -> RepositoryError {
    match err {
        DbErr::RecordNotUpdated | DbErr::RecordNotFound(_) => {
            RepositoryError::NotFound(format!("{} {}", entity, id))
        }
        other => RepositoryError::DbError(other),
    }
}

// ============================================
// Conversions
// ============================================

impl From<users::Model> for User {
    fn from(model: users::Model) -> Self {
        Self {
            id: model.id,
            username: model.username,
            email: model.email,
            created_at: model.created_at,
        }
    }
}

impl From<conversations::Model> for Conversation {
    fn from(model: conversations::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            title: model.title,
            created_at: model.created_at,
            last_activity: model.last_activity,
            metadata: model.metadata,
            soft_delete: SoftDelete {
                deleted_at: model.deleted_at,
            },
        }
    }
}

impl From<messages::Model> for Message {
    fn from(model: messages::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            conversation_id: model.conversation_id,
            role: model.role,
            content: model.content,
            tokens: model.tokens,
            metadata: model.metadata,
            timestamp: model.timestamp,
            status: model.status,
            soft_delete: SoftDelete {
                deleted_at: model.deleted_at,
            },
        }
    }
}
