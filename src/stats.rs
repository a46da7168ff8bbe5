//! Archive statistics overview.
//!
//! Summarizes what has been archived: chat, message, user and roster
//! counts plus a per-chat breakdown. Used by `chatvault stats` to give
//! confidence that syncs are landing where they should.

use anyhow::Result;
use sqlx::Row;
use walkdir::WalkDir;

use crate::config::Config;
use crate::db;

/// Per-chat breakdown row.
struct ChatStats {
    id: i64,
    title: String,
    kind: &'static str,
    message_count: i64,
    member_count: Option<i64>,
    roster_count: i64,
    last_message_ts: Option<i64>,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let total_chats: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM channels")
        .fetch_one(&pool)
        .await?;

    let total_messages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
        .fetch_one(&pool)
        .await?;

    let total_users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&pool)
        .await?;

    let total_roster: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM group_users")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    let blob_size: u64 = WalkDir::new(&config.db.blob_dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum();

    println!("chatvault archive stats");
    println!("=======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Blobs:       {}", format_bytes(blob_size));
    println!();
    println!("  Chats:       {}", total_chats);
    println!("  Messages:    {}", total_messages);
    println!("  Users:       {}", total_users);
    println!("  Roster rows: {}", total_roster);

    let chat_rows = sqlx::query(
        r#"
        SELECT
            c.id,
            c.title,
            c.broadcast,
            c.megagroup,
            c.gigagroup,
            c.member_count,
            (SELECT COUNT(*) FROM messages m WHERE m.chat_id = c.id) AS message_count,
            (SELECT MAX(m.date) FROM messages m WHERE m.chat_id = c.id) AS last_message_ts,
            (SELECT COUNT(*) FROM group_users g WHERE g.group_id = c.id) AS roster_count
        FROM channels c
        ORDER BY message_count DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let chat_stats: Vec<ChatStats> = chat_rows
        .iter()
        .map(|row| ChatStats {
            id: row.get("id"),
            title: row
                .get::<Option<String>, _>("title")
                .unwrap_or_default(),
            kind: kind_label(
                row.get("broadcast"),
                row.get("megagroup"),
                row.get("gigagroup"),
            ),
            message_count: row.get("message_count"),
            member_count: row.get("member_count"),
            roster_count: row.get("roster_count"),
            last_message_ts: row.get("last_message_ts"),
        })
        .collect();

    if !chat_stats.is_empty() {
        println!();
        println!("  By chat:");
        println!(
            "  {:<14} {:<24} {:<12} {:>8} {:>8} {:>8}   {}",
            "ID", "TITLE", "KIND", "MSGS", "MEMBERS", "ROSTER", "LAST MESSAGE"
        );
        println!("  {}", "-".repeat(92));

        for c in &chat_stats {
            let members = match c.member_count {
                Some(n) => n.to_string(),
                None => "-".to_string(),
            };
            let last_display = match c.last_message_ts {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!(
                "  {:<14} {:<24} {:<12} {:>8} {:>8} {:>8}   {}",
                c.id, c.title, c.kind, c.message_count, members, c.roster_count, last_display
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

fn kind_label(broadcast: bool, megagroup: bool, gigagroup: bool) -> &'static str {
    if broadcast {
        "channel"
    } else if gigagroup {
        "gigagroup"
    } else if megagroup {
        "supergroup"
    } else {
        "group"
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
