//! Core data models used throughout chat-vault.
//!
//! Two layers: `Raw*` records as produced by a [`crate::source::ChatSource`]
//! before normalization, and the canonical entities persisted by the store.
//! Month/Day are derived aggregates computed per build, never persisted.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Chat kinds a source can resolve. Only group-like kinds are archivable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerKind {
    User,
    Group,
    Megagroup,
    Gigagroup,
    Broadcast,
}

impl PeerKind {
    pub fn is_group(self) -> bool {
        !matches!(self, PeerKind::User)
    }

    /// `(broadcast, megagroup, gigagroup)` flags for this kind. Plain
    /// groups archive as megagroups, the discussion-group shape.
    pub fn channel_flags(self) -> (bool, bool, bool) {
        match self {
            PeerKind::Broadcast => (true, false, false),
            PeerKind::Group | PeerKind::Megagroup => (false, true, false),
            PeerKind::Gigagroup => (false, false, true),
            PeerKind::User => (false, false, false),
        }
    }
}

/// Resolved chat reference before normalization.
#[derive(Debug, Clone)]
pub struct RawPeer {
    pub id: i64,
    pub username: Option<String>,
    pub title: String,
    pub kind: PeerKind,
}

/// Extended chat metadata as reported by the source.
///
/// The kind flags arrive independently; exactly one must be set and the
/// metadata sync treats any other combination as corrupt upstream data.
#[derive(Debug, Clone)]
pub struct RawChannelInfo {
    pub id: i64,
    pub username: Option<String>,
    pub title: Option<String>,
    pub about: Option<String>,
    pub member_count: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
    pub broadcast: bool,
    pub megagroup: bool,
    pub gigagroup: bool,
    pub linked_chat_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct RawUser {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub bot: bool,
    pub scam: bool,
    pub fake: bool,
}

/// Roster entry with the member's role flags.
#[derive(Debug, Clone)]
pub struct RawParticipant {
    pub user: RawUser,
    pub creator: bool,
    pub admin: bool,
}

/// System-message payloads worth archiving.
#[derive(Debug, Clone)]
pub enum RawAction {
    UserJoined { user: RawUser },
    UserLeft,
}

#[derive(Debug, Clone)]
pub struct RawPollOption {
    pub label: String,
    pub votes: i64,
}

/// Attachment as reported by the source. `file`/`thumb` are source-side
/// references handed back to the source when the bytes are downloaded.
#[derive(Debug, Clone)]
pub enum RawMedia {
    Webpage {
        url: Option<String>,
        title: Option<String>,
        description: Option<String>,
    },
    Photo {
        file: Option<String>,
        thumb: Option<String>,
    },
    Document {
        file: Option<String>,
        thumb: Option<String>,
        name: Option<String>,
        mime: Option<String>,
    },
    Contact {
        first_name: Option<String>,
        last_name: Option<String>,
        phone: Option<String>,
    },
    Poll {
        question: String,
        options: Vec<RawPollOption>,
        total_voters: Option<i64>,
    },
    Sticker {
        emoji: Option<String>,
    },
}

/// One message as produced by a source, before normalization.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub id: i64,
    pub date: DateTime<Utc>,
    pub edit_date: Option<DateTime<Utc>>,
    pub text: String,
    pub sender: Option<RawUser>,
    pub action: Option<RawAction>,
    pub reply_to: Option<i64>,
    pub media: Option<RawMedia>,
}

/// Archived chat metadata. Exactly one of the kind flags is true.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: i64,
    pub username: Option<String>,
    pub title: Option<String>,
    pub about: Option<String>,
    pub member_count: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub broadcast: bool,
    pub megagroup: bool,
    pub gigagroup: bool,
    pub linked_chat_id: Option<i64>,
}

/// Archived account. Later syncs overwrite all fields.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub bot: bool,
    /// Qualifiers out of `bot`, `scam`, `fake`.
    pub tags: Vec<String>,
    /// Blob name in the avatars collection.
    pub avatar: Option<String>,
}

impl User {
    /// Display name for rendering: full name, else @username, else the id.
    pub fn display_name(&self) -> String {
        let name = match (&self.first_name, &self.last_name) {
            (Some(f), Some(l)) => format!("{} {}", f, l),
            (Some(f), None) => f.clone(),
            (None, Some(l)) => l.clone(),
            (None, None) => String::new(),
        };
        if !name.trim().is_empty() {
            name
        } else if let Some(u) = &self.username {
            format!("@{}", u)
        } else {
            self.id.to_string()
        }
    }
}

/// Roster snapshot row; replaced wholesale on every membership sync.
#[derive(Debug, Clone)]
pub struct GroupUser {
    pub group_id: i64,
    pub user: User,
    pub creator: bool,
    pub admin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageAction {
    UserJoined { to_user: i64 },
    UserLeft,
}

impl MessageAction {
    pub fn kind(&self) -> &'static str {
        match self {
            MessageAction::UserJoined { .. } => "user_joined",
            MessageAction::UserLeft => "user_left",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollOption {
    pub label: String,
    pub count: i64,
    pub percent: f64,
}

/// Archived attachment, one variant per kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Media {
    Webpage {
        url: Option<String>,
        title: Option<String>,
        description: Option<String>,
    },
    Photo {
        /// Blob name in the media collection.
        file: Option<String>,
        thumb: Option<String>,
    },
    Document {
        file: Option<String>,
        thumb: Option<String>,
        title: Option<String>,
    },
    Contact {
        name: Option<String>,
        phone: Option<String>,
    },
    Poll {
        title: Option<String>,
        options: Vec<PollOption>,
    },
}

impl Media {
    pub fn kind(&self) -> &'static str {
        match self {
            Media::Webpage { .. } => "webpage",
            Media::Photo { .. } => "photo",
            Media::Document { .. } => "document",
            Media::Contact { .. } => "contact",
            Media::Poll { .. } => "poll",
        }
    }

    /// Splits into the store's `(media_type, media_spec)` column pair.
    pub fn to_columns(&self) -> anyhow::Result<(String, String)> {
        let mut value = serde_json::to_value(self)?;
        if let Some(obj) = value.as_object_mut() {
            obj.remove("type");
        }
        Ok((self.kind().to_string(), serde_json::to_string(&value)?))
    }

    pub fn from_columns(media_type: &str, media_spec: &str) -> anyhow::Result<Media> {
        let mut value: serde_json::Value = serde_json::from_str(media_spec)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("type".to_string(), serde_json::Value::from(media_type));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Short human label used by the feed when a message has no text.
    pub fn title(&self) -> Option<String> {
        match self {
            Media::Webpage { title, url, .. } => title.clone().or_else(|| url.clone()),
            Media::Photo { file, .. } => file.clone(),
            Media::Document { title, file, .. } => title.clone().or_else(|| file.clone()),
            Media::Contact { name, .. } => name.clone(),
            Media::Poll { title, .. } => title.clone(),
        }
    }
}

/// Archived message with the sender snapshot embedded.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    /// 0 when the archive is not owner-scoped.
    pub owner_id: i64,
    pub date: DateTime<Utc>,
    pub edit_date: Option<DateTime<Utc>>,
    pub content: Option<String>,
    pub reply_to: Option<i64>,
    pub action: Option<MessageAction>,
    pub user: User,
    pub media: Option<Media>,
}

/// Calendar-month aggregate over one chat's messages.
#[derive(Debug, Clone, PartialEq)]
pub struct Month {
    pub date: NaiveDate,
    pub slug: String,
    pub label: String,
    pub count: i64,
}

/// Calendar-day aggregate; `first_page` is the page holding the day's
/// first message within its month.
#[derive(Debug, Clone, PartialEq)]
pub struct Day {
    pub date: NaiveDate,
    pub slug: String,
    pub label: String,
    pub count: i64,
    pub first_page: usize,
}
