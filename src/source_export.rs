//! Chat source backed by a message-export directory.
//!
//! Reads the `result.json` a desktop messenger writes when exporting a
//! single chat (top-level `messages`) or a whole account (`chats.list`,
//! plus `left_chats`). Media references resolve to files relative to the
//! export directory. Rosters and other accounts' profile photos are not
//! part of the export format, so [`ChatSource::participants`] reports
//! unsupported and avatars come back empty.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::models::{
    PeerKind, RawAction, RawChannelInfo, RawMedia, RawMessage, RawParticipant, RawPeer,
    RawPollOption, RawUser,
};
use crate::source::{ChatSource, SourceError, SourceResult};

const RESULT_FILE: &str = "result.json";

pub struct ExportSource {
    root: PathBuf,
    cache: Mutex<Option<Arc<Vec<ExportChat>>>>,
}

impl ExportSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(None),
        }
    }

    fn load(&self) -> SourceResult<Arc<Vec<ExportChat>>> {
        let mut cache = self.cache.lock().unwrap();
        if let Some(chats) = cache.as_ref() {
            return Ok(Arc::clone(chats));
        }
        let chats = Arc::new(self.parse()?);
        *cache = Some(Arc::clone(&chats));
        Ok(chats)
    }

    fn refresh(&self) -> SourceResult<Arc<Vec<ExportChat>>> {
        let chats = Arc::new(self.parse()?);
        *self.cache.lock().unwrap() = Some(Arc::clone(&chats));
        Ok(chats)
    }

    fn parse(&self) -> SourceResult<Vec<ExportChat>> {
        let path = self.root.join(RESULT_FILE);
        let body = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read export file {}", path.display()))?;
        let file: ExportFile = serde_json::from_str(&body)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        let mut chats = Vec::new();
        if let Some(listing) = file.chats {
            chats.extend(listing.list);
        }
        if let Some(listing) = file.left_chats {
            chats.extend(listing.list);
        }
        if chats.is_empty() {
            if let Some(id) = file.id {
                chats.push(ExportChat {
                    name: file.name,
                    kind: file.kind,
                    id,
                    messages: file.messages,
                });
            }
        }
        if chats.is_empty() {
            return Err(SourceError::Other(anyhow::anyhow!(
                "{} contains no chats",
                path.display()
            )));
        }
        Ok(chats)
    }
}

#[async_trait]
impl ChatSource for ExportSource {
    async fn dialogs(&self) -> SourceResult<Vec<RawPeer>> {
        // The dialog listing doubles as the refresh point, so a
        // regenerated export is picked up without restarting.
        let chats = self.refresh()?;
        Ok(chats.iter().map(raw_peer).collect())
    }

    async fn resolve(&self, target: &str) -> SourceResult<RawPeer> {
        let chats = self.load()?;
        let id = target.parse::<i64>().ok();
        // Exports carry no usernames, so "@name" can only match a title.
        let title = target.strip_prefix('@').unwrap_or(target);
        chats
            .iter()
            .find(|c| Some(c.id) == id || c.name.as_deref() == Some(title))
            .map(raw_peer)
            .ok_or_else(|| SourceError::NotFound(target.to_string()))
    }

    async fn channel_info(&self, chat_id: i64) -> SourceResult<RawChannelInfo> {
        let chats = self.load()?;
        let chat = chat_by_id(&chats, chat_id)?;
        let (broadcast, megagroup, gigagroup) = peer_kind(chat.kind.as_deref()).channel_flags();
        Ok(RawChannelInfo {
            id: chat.id,
            username: None,
            title: chat.name.clone(),
            about: None,
            member_count: None,
            created_at: None,
            broadcast,
            megagroup,
            gigagroup,
            linked_chat_id: None,
        })
    }

    async fn messages(
        &self,
        chat_id: i64,
        min_id: i64,
        limit: usize,
    ) -> SourceResult<Vec<RawMessage>> {
        let chats = self.load()?;
        let chat = chat_by_id(&chats, chat_id)?;
        let mut batch: Vec<RawMessage> = chat
            .messages
            .iter()
            .filter(|m| m.id > min_id)
            .filter_map(raw_message)
            .collect();
        batch.sort_by_key(|m| m.id);
        batch.truncate(limit);
        Ok(batch)
    }

    async fn messages_by_id(&self, chat_id: i64, ids: &[i64]) -> SourceResult<Vec<RawMessage>> {
        let chats = self.load()?;
        let chat = chat_by_id(&chats, chat_id)?;
        let mut batch: Vec<RawMessage> = chat
            .messages
            .iter()
            .filter(|m| ids.contains(&m.id))
            .filter_map(raw_message)
            .collect();
        batch.sort_by_key(|m| m.id);
        Ok(batch)
    }

    async fn latest_message(&self, chat_id: i64) -> SourceResult<Option<RawMessage>> {
        let chats = self.load()?;
        let chat = chat_by_id(&chats, chat_id)?;
        Ok(chat
            .messages
            .iter()
            .max_by_key(|m| m.id)
            .and_then(raw_message))
    }

    async fn participants(&self, _chat_id: i64) -> SourceResult<Vec<RawParticipant>> {
        Err(SourceError::Unsupported("participants"))
    }

    async fn avatar(&self, _user_id: i64) -> SourceResult<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn media_bytes(&self, _chat_id: i64, file_ref: &str) -> SourceResult<Vec<u8>> {
        let path = self.root.join(file_ref);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SourceError::NotFound(file_ref.to_string()))
            }
            Err(e) => Err(SourceError::Other(
                anyhow::Error::new(e).context(format!("failed to read {}", path.display())),
            )),
        }
    }
}

#[derive(Deserialize)]
struct ExportFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    messages: Vec<ExportMessage>,
    #[serde(default)]
    chats: Option<ExportChatList>,
    #[serde(default)]
    left_chats: Option<ExportChatList>,
}

#[derive(Deserialize)]
struct ExportChatList {
    #[serde(default)]
    list: Vec<ExportChat>,
}

#[derive(Deserialize)]
struct ExportChat {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    id: i64,
    #[serde(default)]
    messages: Vec<ExportMessage>,
}

#[derive(Deserialize)]
struct ExportMessage {
    id: i64,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    date_unixtime: Option<String>,
    #[serde(default)]
    edited: Option<String>,
    #[serde(default)]
    edited_unixtime: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    from_id: Option<String>,
    #[serde(default)]
    actor: Option<String>,
    #[serde(default)]
    actor_id: Option<String>,
    #[serde(default)]
    action: Option<String>,
    /// Display names of accounts an action touched; deleted ones are null.
    #[serde(default)]
    members: Vec<Option<String>>,
    #[serde(default)]
    reply_to_message_id: Option<i64>,
    /// A plain string, or an array of strings and entity objects.
    #[serde(default)]
    text: serde_json::Value,
    #[serde(default)]
    photo: Option<String>,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    sticker_emoji: Option<String>,
    #[serde(default)]
    contact_information: Option<ExportContact>,
    #[serde(default)]
    poll: Option<ExportPoll>,
}

#[derive(Deserialize)]
struct ExportContact {
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    phone_number: Option<String>,
}

#[derive(Deserialize)]
struct ExportPoll {
    question: String,
    #[serde(default)]
    total_voters: Option<i64>,
    #[serde(default)]
    answers: Vec<ExportPollAnswer>,
}

#[derive(Deserialize)]
struct ExportPollAnswer {
    text: String,
    #[serde(default)]
    voters: i64,
}

fn chat_by_id(chats: &[ExportChat], chat_id: i64) -> SourceResult<&ExportChat> {
    chats
        .iter()
        .find(|c| c.id == chat_id)
        .ok_or_else(|| SourceError::NotFound(chat_id.to_string()))
}

fn raw_peer(chat: &ExportChat) -> RawPeer {
    RawPeer {
        id: chat.id,
        username: None,
        title: chat.name.clone().unwrap_or_default(),
        kind: peer_kind(chat.kind.as_deref()),
    }
}

fn peer_kind(kind: Option<&str>) -> PeerKind {
    match kind.unwrap_or_default() {
        "personal_chat" | "bot_chat" | "saved_messages" => PeerKind::User,
        "private_channel" | "public_channel" => PeerKind::Broadcast,
        "private_supergroup" | "public_supergroup" => PeerKind::Megagroup,
        // Unlisted kinds archive as plain groups.
        _ => PeerKind::Group,
    }
}

/// Converts one export record. Records without a parseable date cannot
/// be archived and are dropped.
fn raw_message(m: &ExportMessage) -> Option<RawMessage> {
    let date = parse_date(m.date_unixtime.as_deref(), m.date.as_deref())?;
    let sender = sender_of(m);
    let action = action_of(m, sender.as_ref());
    Some(RawMessage {
        id: m.id,
        date,
        edit_date: parse_date(m.edited_unixtime.as_deref(), m.edited.as_deref()),
        text: flatten_text(&m.text),
        sender,
        action,
        reply_to: m.reply_to_message_id,
        media: media_of(m),
    })
}

/// The posting account: `from_id` on regular messages, `actor_id` on
/// service messages. Channel posts become pseudo-users carrying the
/// channel's display name.
fn sender_of(m: &ExportMessage) -> Option<RawUser> {
    let (id, name) = match (&m.from_id, &m.actor_id) {
        (Some(id), _) => (id, &m.from),
        (None, Some(id)) => (id, &m.actor),
        (None, None) => return None,
    };
    Some(RawUser {
        id: parse_peer_id(id)?,
        username: None,
        first_name: name.clone(),
        last_name: None,
        phone: None,
        bot: false,
        scam: false,
        fake: false,
    })
}

/// Join and leave service actions, where the affected account is
/// identifiable. Inviting a third party names them without an id, so
/// those messages archive with no action.
fn action_of(m: &ExportMessage, sender: Option<&RawUser>) -> Option<RawAction> {
    match m.action.as_deref()? {
        "join_group_by_link" => Some(RawAction::UserJoined {
            user: sender?.clone(),
        }),
        "invite_members" => {
            let [Some(member)] = m.members.as_slice() else {
                return None;
            };
            if m.actor.as_deref() == Some(member.as_str()) {
                Some(RawAction::UserJoined {
                    user: sender?.clone(),
                })
            } else {
                None
            }
        }
        "remove_members" => Some(RawAction::UserLeft),
        _ => None,
    }
}

fn media_of(m: &ExportMessage) -> Option<RawMedia> {
    if m.media_type.as_deref() == Some("sticker") || m.sticker_emoji.is_some() {
        return Some(RawMedia::Sticker {
            emoji: m.sticker_emoji.clone(),
        });
    }
    if let Some(photo) = &m.photo {
        return Some(RawMedia::Photo {
            file: Some(photo.clone()),
            thumb: m.thumbnail.clone(),
        });
    }
    if let Some(contact) = &m.contact_information {
        return Some(RawMedia::Contact {
            first_name: non_empty(&contact.first_name),
            last_name: non_empty(&contact.last_name),
            phone: non_empty(&contact.phone_number),
        });
    }
    if let Some(poll) = &m.poll {
        return Some(RawMedia::Poll {
            question: poll.question.clone(),
            options: poll
                .answers
                .iter()
                .map(|a| RawPollOption {
                    label: a.text.clone(),
                    votes: a.voters,
                })
                .collect(),
            total_voters: poll.total_voters,
        });
    }
    if let Some(file) = &m.file {
        return Some(RawMedia::Document {
            file: Some(file.clone()),
            thumb: m.thumbnail.clone(),
            name: m.file_name.clone(),
            mime: m.mime_type.clone(),
        });
    }
    None
}

/// Formatted text arrives as an array of plain strings and entity
/// objects; the archive keeps the visible text only.
fn flatten_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(parts) => {
            let mut out = String::new();
            for part in parts {
                match part {
                    serde_json::Value::String(s) => out.push_str(s),
                    serde_json::Value::Object(obj) => {
                        if let Some(text) = obj.get("text").and_then(|t| t.as_str()) {
                            out.push_str(text);
                        }
                    }
                    _ => {}
                }
            }
            out
        }
        _ => String::new(),
    }
}

/// Peer references look like "user123", "channel123" or "chat123".
fn parse_peer_id(raw: &str) -> Option<i64> {
    let digits = raw
        .strip_prefix("user")
        .or_else(|| raw.strip_prefix("channel"))
        .or_else(|| raw.strip_prefix("chat"))
        .unwrap_or(raw);
    digits.parse().ok()
}

/// Newer exports carry an epoch string next to the timestamp; older
/// ones only a naive local time, which is read as UTC.
fn parse_date(unixtime: Option<&str>, iso: Option<&str>) -> Option<DateTime<Utc>> {
    if let Some(ts) = unixtime.and_then(|s| s.parse::<i64>().ok()) {
        return DateTime::from_timestamp(ts, 0);
    }
    iso.and_then(|s| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").ok())
        .map(|dt| dt.and_utc())
}

fn non_empty(s: &Option<String>) -> Option<String> {
    s.as_deref().filter(|s| !s.is_empty()).map(str::to_string)
}
