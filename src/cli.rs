//! Command-line interface.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

use crate::config::Config;
use crate::models::internal::{Conversation, Message, NewConversation, NewUser, SoftDeletable};
use crate::providers::{build_provider, CompletionOptions};
use crate::services::ChatService;
use crate::storage::{self, ConversationRepository, SeaOrmConversationRepository};

/// Persistent chat conversations backed by an LLM provider
#[derive(Parser, Debug)]
#[command(name = "ai-assistant")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path (defaults to ~/.ai-assistant/config)
    #[arg(short, long, global = true, env = "ASSISTANT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run database migrations
    Migrate(MigrateArgs),

    /// Manage users
    #[command(subcommand)]
    User(UserCommand),

    /// Manage conversations
    #[command(subcommand)]
    Conversation(ConversationCommand),

    /// Send a message and print the reply
    Chat(ChatArgs),
}

#[derive(Args, Debug)]
pub struct MigrateArgs {
    #[command(subcommand)]
    pub action: Option<MigrateAction>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum MigrateAction {
    /// Run pending migrations (default)
    Up,
    /// Show migration status
    Status,
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    /// Create a user
    Create {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConversationCommand {
    /// Start a conversation
    Create {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        title: Option<String>,
    },
    /// List a user's conversations, most recent first
    List {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        include_deleted: bool,
    },
    /// Print a conversation and its messages
    Show { id: Uuid },
    /// Soft delete
    Delete { id: Uuid },
    /// Undo a soft delete
    Restore { id: Uuid },
    /// Permanently delete a conversation and its messages
    Purge { id: Uuid },
}

#[derive(Args, Debug)]
pub struct ChatArgs {
    pub conversation: Uuid,
    pub message: String,
    /// Override the configured model
    #[arg(long)]
    pub model: Option<String>,
    #[arg(long)]
    pub temperature: Option<f32>,
    #[arg(long)]
    pub max_tokens: Option<u32>,
}

impl Cli {
    pub fn load_config(&self) -> Result<Config, crate::config::ConfigError> {
        match &self.config {
            Some(path) => Config::load_from_file(path),
            None => Config::load(),
        }
    }
}

pub async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    match cli.command {
        Commands::Migrate(args) => {
            migrate(&config, args.action.unwrap_or(MigrateAction::Up)).await
        }
        Commands::User(cmd) => {
            let repo = open_repository(&config).await?;
            user(repo.as_ref(), cmd).await
        }
        Commands::Conversation(cmd) => {
            let repo = open_repository(&config).await?;
            conversation(repo.as_ref(), cmd).await
        }
        Commands::Chat(args) => {
            let repo = open_repository(&config).await?;
            chat(&config, repo, args).await
        }
    }
}

async fn open_repository(config: &Config) -> anyhow::Result<Arc<dyn ConversationRepository>> {
    let db = storage::init_db_with(&config.database_url, config.max_connections)
        .await
        .context("failed to open database")?;

    Ok(Arc::new(
        SeaOrmConversationRepository::new(db).with_time_zone(config.time_zone_offset()),
    ))
}

async fn migrate(config: &Config, action: MigrateAction) -> anyhow::Result<()> {
    match action {
        MigrateAction::Up => {
            storage::init_db_with(&config.database_url, config.max_connections).await?;
            println!("Migrations applied");
        }
        MigrateAction::Status => {
            let db = storage::db::connect(&config.database_url, config.max_connections).await?;
            for (name, applied) in storage::migration_status(&db).await? {
                println!("{} {}", if applied { "[x]" } else { "[ ]" }, name);
            }
        }
    }
    Ok(())
}

async fn user(repo: &dyn ConversationRepository, cmd: UserCommand) -> anyhow::Result<()> {
    match cmd {
        UserCommand::Create { username, email } => {
            let user = repo.create_user(NewUser { username, email }).await?;
            println!("{}", user.id);
        }
    }
    Ok(())
}

async fn conversation(
    repo: &dyn ConversationRepository,
    cmd: ConversationCommand,
) -> anyhow::Result<()> {
    match cmd {
        ConversationCommand::Create { user, title } => {
            repo.find_user_by_id(user)
                .await?
                .with_context(|| format!("user {} not found", user))?;

            let mut new_conv = NewConversation::new(user);
            if let Some(title) = title {
                new_conv = new_conv.with_title(title);
            }
            let conv = repo.create_conversation(new_conv).await?;
            println!("{}\t{}", conv.id, conv);
        }
        ConversationCommand::List {
            user,
            include_deleted,
        } => {
            let conversations = if include_deleted {
                repo.list_conversations_with_deleted(user).await?
            } else {
                repo.list_conversations(user).await?
            };
            for conv in &conversations {
                print_conversation_line(conv);
            }
        }
        ConversationCommand::Show { id } => {
            let conv = find_conversation(repo, id).await?;
            print_conversation_line(&conv);
            for msg in repo.get_conversation_messages(id).await? {
                print_message(&msg);
            }
        }
        ConversationCommand::Delete { id } => {
            let mut conv = find_conversation(repo, id).await?;
            repo.soft_delete_conversation(&mut conv).await?;
            println!("Deleted {}", id);
        }
        ConversationCommand::Restore { id } => {
            let mut conv = find_conversation(repo, id).await?;
            repo.restore_conversation(&mut conv).await?;
            println!("Restored {}", id);
        }
        ConversationCommand::Purge { id } => {
            repo.hard_delete_conversation(id).await?;
            println!("Purged {}", id);
        }
    }
    Ok(())
}

async fn chat(
    config: &Config,
    repo: Arc<dyn ConversationRepository>,
    args: ChatArgs,
) -> anyhow::Result<()> {
    let provider = build_provider(config.provider, config)?;
    let service = ChatService::new(repo, provider);

    let mut options = CompletionOptions::default();
    if let Some(model) = args.model {
        options = options.with_model(model);
    }
    if let Some(temperature) = args.temperature {
        options = options.with_temperature(temperature);
    }
    if let Some(max_tokens) = args.max_tokens {
        options = options.with_max_tokens(max_tokens);
    }

    let exchange = service
        .send_message(args.conversation, &args.message, options)
        .await?;
    println!("{}", exchange.reply.content);
    Ok(())
}

async fn find_conversation(
    repo: &dyn ConversationRepository,
    id: Uuid,
) -> anyhow::Result<Conversation> {
    repo.find_conversation(id)
        .await?
        .with_context(|| format!("conversation {} not found", id))
}

fn print_conversation_line(conv: &Conversation) {
    let activity = conv
        .last_activity
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "-".to_string());
    let marker = if conv.is_deleted() { " (deleted)" } else { "" };
    println!("{}\t{}\t{}{}", conv.id, activity, conv, marker);
}

fn print_message(msg: &Message) {
    println!(
        "[{}] {} ({}): {}",
        msg.timestamp.to_rfc3339(),
        msg.role,
        msg.status,
        msg.content
    );
}
