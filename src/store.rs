//! SQLite-backed store: entity upserts keyed on natural keys, the sync
//! cursor query, and the paged reads the build pipeline consumes.
//!
//! Uniqueness lives in the schema (`db.rs`); every write here is an
//! `ON CONFLICT ... DO UPDATE`, so re-ingesting an already-archived range
//! changes nothing beyond overwriting fields with their latest values.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::blobs::BlobStore;
use crate::config::Config;
use crate::db;
use crate::models::{Channel, GroupUser, Media, Message, MessageAction, User};

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    blobs: BlobStore,
}

impl Store {
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        Ok(Self {
            pool,
            blobs: BlobStore::new(config.db.blob_dir.clone()),
        })
    }

    /// Store over a private in-memory database, for tests.
    pub async fn in_memory(blob_root: &Path) -> Result<Self> {
        let pool = db::connect_in_memory().await?;
        Ok(Self {
            pool,
            blobs: BlobStore::new(blob_root.to_path_buf()),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    // ---- channels ----

    pub async fn upsert_channel(&self, channel: &Channel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO channels
                (id, username, title, about, member_count, created_at,
                 last_message_at, broadcast, megagroup, gigagroup, linked_chat_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                title = excluded.title,
                about = excluded.about,
                member_count = excluded.member_count,
                created_at = excluded.created_at,
                last_message_at = excluded.last_message_at,
                broadcast = excluded.broadcast,
                megagroup = excluded.megagroup,
                gigagroup = excluded.gigagroup,
                linked_chat_id = excluded.linked_chat_id
            "#,
        )
        .bind(channel.id)
        .bind(&channel.username)
        .bind(&channel.title)
        .bind(&channel.about)
        .bind(channel.member_count)
        .bind(channel.created_at.map(|d| d.timestamp()))
        .bind(channel.last_message_at.map(|d| d.timestamp()))
        .bind(channel.broadcast)
        .bind(channel.megagroup)
        .bind(channel.gigagroup)
        .bind(channel.linked_chat_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn channel(&self, id: i64) -> Result<Option<Channel>> {
        let row = sqlx::query("SELECT * FROM channels WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| channel_from_row(&r)).transpose()
    }

    pub async fn channel_exists(&self, id: i64) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM channels WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Maps a chat reference to an archived chat id: a numeric id passes
    /// through, `@username` and exact titles are looked up in `channels`.
    pub async fn resolve_chat_ref(&self, target: &str) -> Result<Option<i64>> {
        if let Ok(id) = target.parse::<i64>() {
            return Ok(Some(id));
        }
        let id: Option<i64> = if let Some(username) = target.strip_prefix('@') {
            sqlx::query_scalar("SELECT id FROM channels WHERE username = ? COLLATE NOCASE")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?
        } else {
            sqlx::query_scalar("SELECT id FROM channels WHERE title = ?")
                .bind(target)
                .fetch_optional(&self.pool)
                .await?
        };
        Ok(id)
    }

    // ---- users ----

    pub async fn upsert_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users
                (id, username, first_name, last_name, phone, bot, tags, avatar)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                first_name = excluded.first_name,
                last_name = excluded.last_name,
                phone = excluded.phone,
                bot = excluded.bot,
                tags = excluded.tags,
                avatar = excluded.avatar
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone)
        .bind(user.bot)
        .bind(user.tags.join(" "))
        .bind(&user.avatar)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn user_exists(&self, id: i64) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    pub async fn user(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| user_from_row(&r, "")))
    }

    // ---- group membership ----

    pub async fn delete_group_users(&self, group_id: i64) -> Result<u64> {
        let done = sqlx::query("DELETE FROM group_users WHERE group_id = ?")
            .bind(group_id)
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    pub async fn upsert_group_user(&self, member: &GroupUser) -> Result<()> {
        self.upsert_user(&member.user).await?;
        sqlx::query(
            r#"
            INSERT INTO group_users (group_id, user_id, creator, admin)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(group_id, user_id) DO UPDATE SET
                creator = excluded.creator,
                admin = excluded.admin
            "#,
        )
        .bind(member.group_id)
        .bind(member.user.id)
        .bind(member.creator)
        .bind(member.admin)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn group_user_count(&self, group_id: i64) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM group_users WHERE group_id = ?")
                .bind(group_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    // ---- messages ----

    pub async fn upsert_message(&self, message: &Message) -> Result<()> {
        let (media_type, media_spec) = match &message.media {
            Some(media) => {
                let (t, s) = media.to_columns()?;
                (Some(t), Some(s))
            }
            None => (None, None),
        };
        let (action, action_user_id) = match &message.action {
            Some(MessageAction::UserJoined { to_user }) => {
                (Some("user_joined"), Some(*to_user))
            }
            Some(MessageAction::UserLeft) => (Some("user_left"), None),
            None => (None, None),
        };

        sqlx::query(
            r#"
            INSERT INTO messages
                (chat_id, id, owner_id, date, edit_date, content, reply_to,
                 action, action_user_id, user_id, media_type, media_spec)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chat_id, id, owner_id) DO UPDATE SET
                date = excluded.date,
                edit_date = excluded.edit_date,
                content = excluded.content,
                reply_to = excluded.reply_to,
                action = excluded.action,
                action_user_id = excluded.action_user_id,
                user_id = excluded.user_id,
                media_type = excluded.media_type,
                media_spec = excluded.media_spec
            "#,
        )
        .bind(message.chat_id)
        .bind(message.id)
        .bind(message.owner_id)
        .bind(message.date.timestamp())
        .bind(message.edit_date.map(|d| d.timestamp()))
        .bind(&message.content)
        .bind(message.reply_to)
        .bind(action)
        .bind(action_user_id)
        .bind(message.user.id)
        .bind(media_type)
        .bind(media_spec)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Sync cursor: highest archived message id and its date for the chat
    /// within the owner scope, `(0, None)` when nothing is archived yet.
    pub async fn max_message_id(
        &self,
        chat_id: i64,
        owner_id: i64,
    ) -> Result<(i64, Option<DateTime<Utc>>)> {
        let row = sqlx::query(
            "SELECT id, date FROM messages WHERE chat_id = ? AND owner_id = ? \
             ORDER BY id DESC LIMIT 1",
        )
        .bind(chat_id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            Some(r) => (r.get("id"), DateTime::from_timestamp(r.get("date"), 0)),
            None => (0, None),
        })
    }

    pub async fn message_count(&self, chat_id: i64, owner_id: i64) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages WHERE chat_id = ? AND owner_id = ?",
        )
        .bind(chat_id)
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// `(id, date)` of every archived message, ascending by id. Feeds the
    /// timeline partitioner.
    pub async fn message_dates(
        &self,
        chat_id: i64,
        owner_id: i64,
    ) -> Result<Vec<(i64, DateTime<Utc>)>> {
        let rows = sqlx::query(
            "SELECT id, date FROM messages WHERE chat_id = ? AND owner_id = ? ORDER BY id ASC",
        )
        .bind(chat_id)
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .filter_map(|r| {
                DateTime::from_timestamp(r.get("date"), 0).map(|d| (r.get("id"), d))
            })
            .collect())
    }

    /// One page of messages: ids strictly greater than `after_id`, dates in
    /// `[start_ts, end_ts)`, ascending by id, sender snapshot joined in.
    pub async fn messages_page(
        &self,
        chat_id: i64,
        owner_id: i64,
        start_ts: i64,
        end_ts: i64,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT m.chat_id, m.id, m.owner_id, m.date, m.edit_date, m.content,
                   m.reply_to, m.action, m.action_user_id, m.media_type, m.media_spec,
                   u.id AS u_id, u.username AS u_username, u.first_name AS u_first_name,
                   u.last_name AS u_last_name, u.phone AS u_phone, u.bot AS u_bot,
                   u.tags AS u_tags, u.avatar AS u_avatar
            FROM messages m
            JOIN users u ON u.id = m.user_id
            WHERE m.chat_id = ? AND m.owner_id = ?
              AND m.date >= ? AND m.date < ?
              AND m.id > ?
            ORDER BY m.id ASC
            LIMIT ?
            "#,
        )
        .bind(chat_id)
        .bind(owner_id)
        .bind(start_ts)
        .bind(end_ts)
        .bind(after_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }
}

fn channel_from_row(row: &SqliteRow) -> Result<Channel> {
    Ok(Channel {
        id: row.get("id"),
        username: row.get("username"),
        title: row.get("title"),
        about: row.get("about"),
        member_count: row.get("member_count"),
        created_at: row
            .get::<Option<i64>, _>("created_at")
            .and_then(|ts| DateTime::from_timestamp(ts, 0)),
        last_message_at: row
            .get::<Option<i64>, _>("last_message_at")
            .and_then(|ts| DateTime::from_timestamp(ts, 0)),
        broadcast: row.get("broadcast"),
        megagroup: row.get("megagroup"),
        gigagroup: row.get("gigagroup"),
        linked_chat_id: row.get("linked_chat_id"),
    })
}

fn user_from_row(row: &SqliteRow, prefix: &str) -> User {
    let col = |name: &str| format!("{}{}", prefix, name);
    let tags: String = row.get(col("tags").as_str());
    User {
        id: row.get(col("id").as_str()),
        username: row.get(col("username").as_str()),
        first_name: row.get(col("first_name").as_str()),
        last_name: row.get(col("last_name").as_str()),
        phone: row.get(col("phone").as_str()),
        bot: row.get(col("bot").as_str()),
        tags: tags.split_whitespace().map(str::to_string).collect(),
        avatar: row.get(col("avatar").as_str()),
    }
}

fn message_from_row(row: &SqliteRow) -> Result<Message> {
    let media = match (
        row.get::<Option<String>, _>("media_type"),
        row.get::<Option<String>, _>("media_spec"),
    ) {
        (Some(t), Some(s)) => Some(Media::from_columns(&t, &s)?),
        _ => None,
    };
    let action = match row.get::<Option<String>, _>("action").as_deref() {
        Some("user_joined") => {
            let to_user: Option<i64> = row.get("action_user_id");
            to_user.map(|to_user| MessageAction::UserJoined { to_user })
        }
        Some("user_left") => Some(MessageAction::UserLeft),
        _ => None,
    };
    Ok(Message {
        chat_id: row.get("chat_id"),
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        date: DateTime::from_timestamp(row.get("date"), 0)
            .context("message date out of range")?,
        edit_date: row
            .get::<Option<i64>, _>("edit_date")
            .and_then(|ts| DateTime::from_timestamp(ts, 0)),
        content: row.get("content"),
        reply_to: row.get("reply_to"),
        action,
        user: user_from_row(row, "u_"),
        media,
    })
}
