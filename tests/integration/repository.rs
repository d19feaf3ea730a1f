use super::{create_test_repo, create_test_user, json, tick, ConversationRepository, Uuid};
use ai_assistant::models::internal::{
    MessageStatus, NewConversation, NewMessage, Role, SoftDeletable,
};
use ai_assistant::storage::{conversations, init_db, messages, users};
use ai_assistant::{RepositoryError, SeaOrmConversationRepository};
use chrono::FixedOffset;
use sea_orm::{EntityTrait, PaginatorTrait};

// ============================================
// Conversations
// ============================================

#[tokio::test]
async fn test_create_conversation_derives_title() {
    let repo = create_test_repo().await;
    let user = create_test_user(&repo, "alice").await;

    let conv = repo
        .create_conversation(NewConversation::new(user.id))
        .await
        .unwrap();

    let expected = format!("New Chat - {}", conv.created_at.format("%Y-%m-%d %H:%M:%S"));
    assert_eq!(conv.title, expected);
    assert_eq!(conv.last_activity, Some(conv.created_at));
    assert!(!conv.is_deleted());
}

#[tokio::test]
async fn test_create_conversation_title_uses_configured_offset() {
    let repo = create_test_repo()
        .await
        .with_time_zone(FixedOffset::east_opt(5 * 3600).unwrap());
    let user = create_test_user(&repo, "bob").await;

    let conv = repo
        .create_conversation(NewConversation::new(user.id))
        .await
        .unwrap();

    let local = conv
        .created_at
        .with_timezone(&FixedOffset::east_opt(5 * 3600).unwrap());
    assert_eq!(
        conv.title,
        format!("New Chat - {}", local.format("%Y-%m-%d %H:%M:%S"))
    );
}

#[tokio::test]
async fn test_explicit_title_is_kept_and_never_rederived() {
    let repo = create_test_repo().await;
    let user = create_test_user(&repo, "carol").await;

    let mut conv = repo
        .create_conversation(
            NewConversation::new(user.id)
                .with_title("Trip planning")
                .with_metadata(json!({"topic": "travel"})),
        )
        .await
        .unwrap();
    assert_eq!(conv.title, "Trip planning");

    conv.title = String::new();
    let saved = repo.save_conversation(&conv).await.unwrap();
    assert_eq!(saved.title, "");
    assert_eq!(saved.metadata, json!({"topic": "travel"}));
}

#[tokio::test]
async fn test_create_conversation_rejects_long_title() {
    let repo = create_test_repo().await;
    let user = create_test_user(&repo, "dave").await;

    let result = repo
        .create_conversation(NewConversation::new(user.id).with_title("x".repeat(256)))
        .await;

    assert!(matches!(result, Err(RepositoryError::InvalidInput(_))));
}

#[tokio::test]
async fn test_list_conversations_most_recent_first() {
    let repo = create_test_repo().await;
    let user = create_test_user(&repo, "erin").await;
    let other = create_test_user(&repo, "frank").await;

    let first = repo
        .create_conversation(NewConversation::new(user.id).with_title("first"))
        .await
        .unwrap();
    tick().await;
    let second = repo
        .create_conversation(NewConversation::new(user.id).with_title("second"))
        .await
        .unwrap();
    repo.create_conversation(NewConversation::new(other.id))
        .await
        .unwrap();

    let listed = repo.list_conversations(user.id).await.unwrap();
    let ids: Vec<Uuid> = listed.iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);

    // A new message moves the older conversation to the top
    tick().await;
    repo.create_message(NewMessage::new(user.id, first.id, Role::User, "bump"))
        .await
        .unwrap();

    let listed = repo.list_conversations(user.id).await.unwrap();
    assert_eq!(listed[0].id, first.id);
}

#[tokio::test]
async fn test_soft_delete_and_restore_conversation() {
    let repo = create_test_repo().await;
    let user = create_test_user(&repo, "grace").await;
    let mut conv = repo
        .create_conversation(NewConversation::new(user.id))
        .await
        .unwrap();

    repo.soft_delete_conversation(&mut conv).await.unwrap();
    assert!(conv.is_deleted());

    let reloaded = repo.find_conversation(conv.id).await.unwrap().unwrap();
    assert!(reloaded.is_deleted());
    assert_eq!(reloaded.deleted_at(), conv.deleted_at());
    assert_eq!(reloaded.title, conv.title);

    assert!(repo.list_conversations(user.id).await.unwrap().is_empty());
    assert_eq!(
        repo.list_conversations_with_deleted(user.id)
            .await
            .unwrap()
            .len(),
        1
    );

    repo.restore_conversation(&mut conv).await.unwrap();
    assert!(!conv.is_deleted());
    let reloaded = repo.find_conversation(conv.id).await.unwrap().unwrap();
    assert!(!reloaded.is_deleted());
}

#[tokio::test]
async fn test_soft_delete_missing_conversation_is_not_found() {
    let repo = create_test_repo().await;
    let user = create_test_user(&repo, "heidi").await;
    let mut conv = repo
        .create_conversation(NewConversation::new(user.id))
        .await
        .unwrap();
    repo.hard_delete_conversation(conv.id).await.unwrap();

    let result = repo.soft_delete_conversation(&mut conv).await;
    assert!(matches!(result, Err(RepositoryError::NotFound(_))));
    assert!(!conv.is_deleted());
}

#[tokio::test]
async fn test_hard_delete_removes_messages() {
    let repo = create_test_repo().await;
    let user = create_test_user(&repo, "ivan").await;
    let conv = repo
        .create_conversation(NewConversation::new(user.id))
        .await
        .unwrap();
    let msg = repo
        .create_message(NewMessage::new(user.id, conv.id, Role::User, "Hello"))
        .await
        .unwrap();

    repo.hard_delete_conversation(conv.id).await.unwrap();

    assert!(repo.find_conversation(conv.id).await.unwrap().is_none());
    assert!(repo.find_message_by_id(msg.id).await.unwrap().is_none());
    assert!(matches!(
        repo.hard_delete_conversation(conv.id).await,
        Err(RepositoryError::NotFound(_))
    ));
}

// ============================================
// Messages
// ============================================

#[tokio::test]
async fn test_create_message_updates_last_activity() {
    let repo = create_test_repo().await;
    let user = create_test_user(&repo, "judy").await;
    let conv = repo
        .create_conversation(NewConversation::new(user.id))
        .await
        .unwrap();

    tick().await;
    let msg = repo
        .create_message(NewMessage::new(user.id, conv.id, Role::User, "Hello"))
        .await
        .unwrap();

    assert_eq!(msg.status, MessageStatus::Pending);
    assert_eq!(msg.tokens, 0);

    let reloaded = repo.find_conversation(conv.id).await.unwrap().unwrap();
    assert_eq!(reloaded.last_activity, Some(msg.timestamp));
    assert_eq!(reloaded.title, conv.title);
    assert_eq!(reloaded.created_at, conv.created_at);
}

#[tokio::test]
async fn test_create_message_for_missing_conversation_writes_nothing() {
    let repo = create_test_repo().await;
    let user = create_test_user(&repo, "ken").await;
    let missing = Uuid::new_v4();

    let result = repo
        .create_message(NewMessage::new(user.id, missing, Role::User, "orphan"))
        .await;

    assert!(matches!(result, Err(RepositoryError::NotFound(_))));
    assert_eq!(repo.count_messages_in_conversation(missing).await.unwrap(), 0);
}

#[tokio::test]
async fn test_save_message_propagates_its_timestamp() {
    let repo = create_test_repo().await;
    let user = create_test_user(&repo, "lena").await;
    let conv = repo
        .create_conversation(NewConversation::new(user.id))
        .await
        .unwrap();

    let mut old = repo
        .create_message(NewMessage::new(user.id, conv.id, Role::User, "first"))
        .await
        .unwrap();
    tick().await;
    let newer = repo
        .create_message(NewMessage::new(user.id, conv.id, Role::Assistant, "second"))
        .await
        .unwrap();
    let reloaded = repo.find_conversation(conv.id).await.unwrap().unwrap();
    assert_eq!(reloaded.last_activity, Some(newer.timestamp));

    // Re-saving the older message moves activity back to its timestamp
    old.content = "first (edited)".to_string();
    let saved = repo.save_message(&old).await.unwrap();
    assert_eq!(saved.content, "first (edited)");
    assert_eq!(saved.timestamp, old.timestamp);

    let reloaded = repo.find_conversation(conv.id).await.unwrap().unwrap();
    assert_eq!(reloaded.last_activity, Some(old.timestamp));
}

#[tokio::test]
async fn test_message_status_persists() {
    let repo = create_test_repo().await;
    let user = create_test_user(&repo, "mallory").await;
    let conv = repo
        .create_conversation(NewConversation::new(user.id))
        .await
        .unwrap();

    let mut ok = repo
        .create_message(NewMessage::new(user.id, conv.id, Role::User, "works"))
        .await
        .unwrap();
    let mut failed = repo
        .create_message(NewMessage::new(user.id, conv.id, Role::User, "breaks"))
        .await
        .unwrap();

    repo.update_message_status(&mut ok, MessageStatus::Completed)
        .await
        .unwrap();
    repo.update_message_status(&mut failed, MessageStatus::Error)
        .await
        .unwrap();
    assert_eq!(ok.status, MessageStatus::Completed);

    let ok = repo.find_message_by_id(ok.id).await.unwrap().unwrap();
    let failed = repo.find_message_by_id(failed.id).await.unwrap().unwrap();
    assert_eq!(ok.status, MessageStatus::Completed);
    assert_eq!(failed.status, MessageStatus::Error);
}

#[tokio::test]
async fn test_messages_ordering_and_recent_window() {
    let repo = create_test_repo().await;
    let user = create_test_user(&repo, "niaj").await;
    let conv = repo
        .create_conversation(NewConversation::new(user.id))
        .await
        .unwrap();

    let mut ids = Vec::new();
    for (i, role) in [Role::System, Role::User, Role::Assistant, Role::User]
        .into_iter()
        .enumerate()
    {
        let msg = repo
            .create_message(
                NewMessage::new(user.id, conv.id, role, format!("message {}", i))
                    .with_tokens(i as u32),
            )
            .await
            .unwrap();
        ids.push(msg.id);
        tick().await;
    }

    let all = repo.get_conversation_messages(conv.id).await.unwrap();
    assert_eq!(all.iter().map(|m| m.id).collect::<Vec<_>>(), ids);
    assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    let recent = repo.find_recent_messages(conv.id, 2).await.unwrap();
    assert_eq!(
        recent.iter().map(|m| m.id).collect::<Vec<_>>(),
        ids[2..].to_vec()
    );
    assert_eq!(repo.count_messages_in_conversation(conv.id).await.unwrap(), 4);
}

#[tokio::test]
async fn test_soft_delete_and_restore_message() {
    let repo = create_test_repo().await;
    let user = create_test_user(&repo, "olivia").await;
    let conv = repo
        .create_conversation(NewConversation::new(user.id))
        .await
        .unwrap();
    let mut msg = repo
        .create_message(NewMessage::new(user.id, conv.id, Role::User, "secret"))
        .await
        .unwrap();
    let before = repo.find_conversation(conv.id).await.unwrap().unwrap();

    repo.soft_delete_message(&mut msg).await.unwrap();
    assert!(msg.is_deleted());

    let reloaded = repo.find_message_by_id(msg.id).await.unwrap().unwrap();
    assert!(reloaded.is_deleted());
    assert_eq!(reloaded.content, "secret");
    assert!(repo.get_conversation_messages(conv.id).await.unwrap().is_empty());
    assert_eq!(
        repo.get_conversation_messages_with_deleted(conv.id)
            .await
            .unwrap()
            .len(),
        1
    );

    // Soft delete is a single-column write; activity is untouched
    let after = repo.find_conversation(conv.id).await.unwrap().unwrap();
    assert_eq!(after.last_activity, before.last_activity);

    repo.restore_message(&mut msg).await.unwrap();
    let reloaded = repo.find_message_by_id(msg.id).await.unwrap().unwrap();
    assert!(!reloaded.is_deleted());
    assert_eq!(repo.get_conversation_messages(conv.id).await.unwrap().len(), 1);
}

// ============================================
// Users
// ============================================

#[tokio::test]
async fn test_deleting_user_cascades_to_conversations_and_messages() {
    let db = init_db("sqlite::memory:").await.unwrap();
    let repo = SeaOrmConversationRepository::new(db.clone());
    let user = create_test_user(&repo, "peggy").await;
    let other = create_test_user(&repo, "quentin").await;

    for _ in 0..2 {
        let conv = repo
            .create_conversation(NewConversation::new(user.id))
            .await
            .unwrap();
        repo.create_message(NewMessage::new(user.id, conv.id, Role::User, "Hello"))
            .await
            .unwrap();
    }
    let kept = repo
        .create_conversation(NewConversation::new(other.id))
        .await
        .unwrap();
    repo.create_message(NewMessage::new(other.id, kept.id, Role::User, "Still here"))
        .await
        .unwrap();

    users::Entity::delete_by_id(user.id).exec(&db).await.unwrap();

    assert!(repo.find_user_by_id(user.id).await.unwrap().is_none());
    assert!(repo.list_conversations_with_deleted(user.id).await.unwrap().is_empty());
    assert_eq!(conversations::Entity::find().count(&db).await.unwrap(), 1);
    assert_eq!(messages::Entity::find().count(&db).await.unwrap(), 1);
    assert_eq!(repo.count_messages_in_conversation(kept.id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_create_conversation_for_unknown_user_fails() {
    let repo = create_test_repo().await;

    let result = repo
        .create_conversation(NewConversation::new(Uuid::new_v4()))
        .await;

    assert!(matches!(result, Err(RepositoryError::DbError(_))));
}

// ============================================
// End-to-end scenario
// ============================================

#[tokio::test]
async fn test_conversation_lifecycle_scenario() {
    let repo = create_test_repo().await;
    let user = create_test_user(&repo, "uma").await;

    let mut conv = repo
        .create_conversation(NewConversation::new(user.id))
        .await
        .unwrap();
    assert!(conv.title.starts_with("New Chat - "));

    tick().await;
    let msg = repo
        .create_message(NewMessage::new(user.id, conv.id, Role::User, "Hello"))
        .await
        .unwrap();
    assert_eq!(msg.status, MessageStatus::Pending);

    let reloaded = repo.find_conversation(conv.id).await.unwrap().unwrap();
    assert_eq!(reloaded.last_activity, Some(msg.timestamp));

    repo.soft_delete_conversation(&mut conv).await.unwrap();
    assert!(repo
        .find_conversation(conv.id)
        .await
        .unwrap()
        .unwrap()
        .is_deleted());

    repo.restore_conversation(&mut conv).await.unwrap();
    let restored = repo.find_conversation(conv.id).await.unwrap().unwrap();
    assert!(!restored.is_deleted());
    assert_eq!(restored.last_activity, Some(msg.timestamp));
}
