use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::config::Config;

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    migrate(&pool).await?;
    Ok(pool)
}

/// Private per-pool database for unit tests.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    // One connection: every :memory: connection is its own database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    migrate(&pool).await?;
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    // Create channels table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS channels (
            id INTEGER PRIMARY KEY,
            username TEXT,
            title TEXT,
            about TEXT,
            member_count INTEGER,
            created_at INTEGER,
            last_message_at INTEGER,
            broadcast INTEGER NOT NULL DEFAULT 0,
            megagroup INTEGER NOT NULL DEFAULT 0,
            gigagroup INTEGER NOT NULL DEFAULT 0,
            linked_chat_id INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create users table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            username TEXT,
            first_name TEXT,
            last_name TEXT,
            phone TEXT,
            bot INTEGER NOT NULL DEFAULT 0,
            tags TEXT NOT NULL DEFAULT '',
            avatar TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create group_users table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS group_users (
            group_id INTEGER NOT NULL,
            user_id INTEGER NOT NULL,
            creator INTEGER NOT NULL DEFAULT 0,
            admin INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (group_id, user_id),
            FOREIGN KEY (user_id) REFERENCES users(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create messages table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            chat_id INTEGER NOT NULL,
            id INTEGER NOT NULL,
            owner_id INTEGER NOT NULL DEFAULT 0,
            date INTEGER NOT NULL,
            edit_date INTEGER,
            content TEXT,
            reply_to INTEGER,
            action TEXT,
            action_user_id INTEGER,
            user_id INTEGER NOT NULL,
            media_type TEXT,
            media_spec TEXT,
            PRIMARY KEY (chat_id, id, owner_id),
            FOREIGN KEY (user_id) REFERENCES users(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_chat_date ON messages(chat_id, owner_id, date)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_user ON messages(user_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_username ON users(username)")
        .execute(pool)
        .await?;

    Ok(())
}
