use std::collections::HashSet;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr, EntityTrait, QueryOrder};
use sea_orm_migration::{seaql_migrations, MigratorTrait};

use crate::storage::migrations::Migrator;

const IN_MEMORY_URL: &str = "sqlite::memory:";

/// Connect and bring the schema up to date using the default pool size.
pub async fn init_db(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    init_db_with(database_url, 5).await
}

pub async fn init_db_with(
    database_url: &str,
    max_connections: u32,
) -> Result<DatabaseConnection, DbErr> {
    let db = connect(database_url, max_connections).await?;

    tracing::info!("Applying migrations...");
    Migrator::up(&db, None).await?;

    Ok(db)
}

/// Connect without touching the schema (used by `migrate status`).
pub async fn connect(database_url: &str, max_connections: u32) -> Result<DatabaseConnection, DbErr> {
    tracing::info!("Connecting to database: {}", database_url);

    let mut options = ConnectOptions::new(database_url.to_owned());
    options.sqlx_logging(false);

    if database_url == IN_MEMORY_URL {
        // Each pooled connection would otherwise get its own empty database
        options.max_connections(1).min_connections(1);
    } else if let Some(path_str) = database_url.strip_prefix("sqlite://") {
        let path_str = path_str.split('?').next().unwrap_or(path_str);
        let path = std::path::Path::new(path_str);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DbErr::Custom(format!("Failed to create DB directory: {}", e)))?;
                tracing::info!("Created database directory: {}", parent.display());
            }
        }

        if !path.exists() {
            std::fs::File::create(path)
                .map_err(|e| DbErr::Custom(format!("Failed to create DB file: {}", e)))?;
            tracing::info!("Created database file: {}", path.display());
        }

        options.max_connections(max_connections);
    } else {
        return Err(DbErr::Custom("Invalid SQLite URL format".to_string()));
    }

    Database::connect(options)
        .await
        .map_err(|e| DbErr::Custom(format!("Connection failed: {}", e)))
}

/// Applied state of every known migration, in declaration order.
pub async fn migration_status(db: &DatabaseConnection) -> Result<Vec<(String, bool)>, DbErr> {
    // Creates the tracking table on a never-migrated database
    Migrator::install(db).await?;

    let applied: HashSet<String> = seaql_migrations::Entity::find()
        .order_by_asc(seaql_migrations::Column::Version)
        .all(db)
        .await?
        .into_iter()
        .map(|m| m.version)
        .collect();

    Ok(Migrator::migrations()
        .iter()
        .map(|m| {
            let name = m.name().to_string();
            let is_applied = applied.contains(&name);
            (name, is_applied)
        })
        .collect())
}
