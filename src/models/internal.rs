use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Format used for auto-generated conversation titles.
pub const TITLE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const DEFAULT_TITLE_PREFIX: &str = "New Chat - ";

// ==================== SOFT DELETE ====================

/// Deletion marker shared by every soft-deletable record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftDelete {
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SoftDelete {
    pub fn active() -> Self {
        Self { deleted_at: None }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Already-deleted records get their timestamp refreshed.
    pub fn mark_deleted(&mut self, at: DateTime<Utc>) {
        self.deleted_at = Some(at);
    }

    pub fn restore(&mut self) {
        self.deleted_at = None;
    }
}

pub trait SoftDeletable {
    fn soft_delete_state(&self) -> &SoftDelete;

    fn soft_delete_state_mut(&mut self) -> &mut SoftDelete;

    fn is_deleted(&self) -> bool {
        self.soft_delete_state().is_deleted()
    }

    fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.soft_delete_state().deleted_at
    }
}

// ==================== ENUMS ====================

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[sea_orm(string_value = "system")]
    System,
    #[sea_orm(string_value = "user")]
    User,
    #[sea_orm(string_value = "assistant")]
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Delivery state of a message; callers drive `Pending -> Completed | Error`.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "error")]
    Error,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Completed => "completed",
            MessageStatus::Error => "error",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "completed" => Ok(MessageStatus::Completed),
            "error" => Ok(MessageStatus::Error),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

// ==================== USERS ====================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewUser {
    #[validate(length(min = 1, max = 150))]
    pub username: String,
    #[validate(email)]
    pub email: String,
}

// ==================== CONVERSATIONS ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    #[serde(flatten)]
    pub soft_delete: SoftDelete,
}

impl Conversation {
    /// Title given to conversations created without one.
    pub fn default_title(created_at: DateTime<Utc>, time_zone: &FixedOffset) -> String {
        format!(
            "{}{}",
            DEFAULT_TITLE_PREFIX,
            created_at
                .with_timezone(time_zone)
                .format(TITLE_TIMESTAMP_FORMAT)
        )
    }
}

impl SoftDeletable for Conversation {
    fn soft_delete_state(&self) -> &SoftDelete {
        &self.soft_delete
    }

    fn soft_delete_state_mut(&mut self) -> &mut SoftDelete {
        &mut self.soft_delete
    }
}

impl fmt::Display for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewConversation {
    pub user_id: Uuid,
    #[validate(length(max = 255))]
    pub title: Option<String>,
    pub metadata: serde_json::Value,
}

impl NewConversation {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            title: None,
            metadata: serde_json::json!({}),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

// ==================== MESSAGES ====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub user_id: Uuid,
    pub conversation_id: Uuid,
    pub role: Role,
    pub content: String,
    pub tokens: u32,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
    #[serde(flatten)]
    pub soft_delete: SoftDelete,
}

impl SoftDeletable for Message {
    fn soft_delete_state(&self) -> &SoftDelete {
        &self.soft_delete
    }

    fn soft_delete_state_mut(&mut self) -> &mut SoftDelete {
        &mut self.soft_delete
    }
}

/// `<user id> - <role> - <timestamp>`. Only the owner's id is held here, so
/// the id stands in for the user's email.
impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {} - {}", self.user_id, self.role, self.timestamp)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub user_id: Uuid,
    pub conversation_id: Uuid,
    pub role: Role,
    pub content: String,
    pub tokens: u32,
    pub metadata: serde_json::Value,
    pub status: MessageStatus,
}

impl NewMessage {
    pub fn new(user_id: Uuid, conversation_id: Uuid, role: Role, content: impl Into<String>) -> Self {
        Self {
            user_id,
            conversation_id,
            role,
            content: content.into(),
            tokens: 0,
            metadata: serde_json::json!({}),
            status: MessageStatus::default(),
        }
    }

    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_tokens(mut self, tokens: u32) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
