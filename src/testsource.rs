//! Scripted [`ChatSource`] double backing the unit tests.
//!
//! State is plain maps behind mutexes so tests can enqueue rate-limit
//! signals and failures between calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::config::{ArchiveConfig, Config, DbConfig, SourceConfig, SyncConfig};
use crate::models::{
    PeerKind, RawChannelInfo, RawMessage, RawParticipant, RawPeer, RawUser,
};
use crate::source::{ChatSource, SourceError, SourceResult};

pub fn test_config() -> Config {
    Config {
        archive: ArchiveConfig {
            group: "10".to_string(),
            owner_id: None,
            timezone: "+00:00".to_string(),
        },
        source: SourceConfig::default(),
        db: DbConfig {
            path: "test.db".into(),
            blob_dir: "blobs".into(),
        },
        sync: SyncConfig {
            fetch_wait_secs: 0,
            ..Default::default()
        },
        build: Default::default(),
    }
}

#[derive(Default)]
pub struct TestSource {
    pub peers: Vec<RawPeer>,
    pub infos: HashMap<i64, RawChannelInfo>,
    pub messages: HashMap<i64, Vec<RawMessage>>,
    /// None means the backend cannot enumerate members at all.
    pub participants: Option<HashMap<i64, Vec<RawParticipant>>>,
    pub avatars: HashMap<i64, Vec<u8>>,
    pub files: HashMap<String, Vec<u8>>,
    pub fail_media: bool,
    /// Each queued value rate-limits one `messages` call.
    pub rate_limits: Mutex<Vec<u64>>,
    pub dialog_calls: AtomicUsize,
}

impl TestSource {
    pub fn new() -> Self {
        Self {
            participants: Some(HashMap::new()),
            ..Self::default()
        }
    }

    /// Registers a dialog peer. Group-like peers also get a matching
    /// channel-info record so they can be synced without extra setup.
    pub fn with_peer(mut self, id: i64, username: &str, title: &str, kind: PeerKind) -> Self {
        let username = if username.is_empty() {
            None
        } else {
            Some(username.to_string())
        };
        if kind.is_group() {
            let (broadcast, megagroup, gigagroup) = kind.channel_flags();
            self.infos.insert(
                id,
                RawChannelInfo {
                    id,
                    username: username.clone(),
                    title: Some(title.to_string()),
                    about: None,
                    member_count: Some(0),
                    created_at: None,
                    broadcast,
                    megagroup,
                    gigagroup,
                    linked_chat_id: None,
                },
            );
        }
        self.peers.push(RawPeer {
            id,
            username,
            title: title.to_string(),
            kind,
        });
        self
    }

    pub fn with_messages(mut self, chat_id: i64, messages: Vec<RawMessage>) -> Self {
        self.messages.insert(chat_id, messages);
        self
    }

    pub fn queue_rate_limit(&self, seconds: u64) {
        self.rate_limits.lock().unwrap().push(seconds);
    }
}

pub fn raw_user(id: i64) -> RawUser {
    RawUser {
        id,
        username: Some(format!("user{}", id)),
        first_name: Some(format!("User{}", id)),
        last_name: None,
        phone: None,
        bot: false,
        scam: false,
        fake: false,
    }
}

pub fn raw_message(id: i64, day: u32, text: &str) -> RawMessage {
    RawMessage {
        id,
        date: Utc.with_ymd_and_hms(2024, 3, day, 10, 0, 0).unwrap(),
        edit_date: None,
        text: text.to_string(),
        sender: Some(raw_user(1)),
        action: None,
        reply_to: None,
        media: None,
    }
}

#[async_trait]
impl ChatSource for TestSource {
    async fn dialogs(&self) -> SourceResult<Vec<RawPeer>> {
        self.dialog_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.peers.clone())
    }

    async fn resolve(&self, target: &str) -> SourceResult<RawPeer> {
        let id = target.parse::<i64>().ok();
        let username = target.strip_prefix('@');
        self.peers
            .iter()
            .find(|p| {
                Some(p.id) == id
                    || (username.is_some() && p.username.as_deref() == username)
                    || p.title == target
            })
            .cloned()
            .ok_or_else(|| SourceError::NotFound(target.to_string()))
    }

    async fn channel_info(&self, chat_id: i64) -> SourceResult<RawChannelInfo> {
        self.infos
            .get(&chat_id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(chat_id.to_string()))
    }

    async fn messages(
        &self,
        chat_id: i64,
        min_id: i64,
        limit: usize,
    ) -> SourceResult<Vec<RawMessage>> {
        if let Some(seconds) = self.rate_limits.lock().unwrap().pop() {
            return Err(SourceError::RateLimited { seconds });
        }
        let mut batch: Vec<RawMessage> = self
            .messages
            .get(&chat_id)
            .map(|all| all.iter().filter(|m| m.id > min_id).cloned().collect())
            .unwrap_or_default();
        batch.sort_by_key(|m| m.id);
        batch.truncate(limit);
        Ok(batch)
    }

    async fn messages_by_id(&self, chat_id: i64, ids: &[i64]) -> SourceResult<Vec<RawMessage>> {
        let mut batch: Vec<RawMessage> = self
            .messages
            .get(&chat_id)
            .map(|all| all.iter().filter(|m| ids.contains(&m.id)).cloned().collect())
            .unwrap_or_default();
        batch.sort_by_key(|m| m.id);
        Ok(batch)
    }

    async fn latest_message(&self, chat_id: i64) -> SourceResult<Option<RawMessage>> {
        Ok(self
            .messages
            .get(&chat_id)
            .and_then(|all| all.iter().max_by_key(|m| m.id).cloned()))
    }

    async fn participants(&self, chat_id: i64) -> SourceResult<Vec<RawParticipant>> {
        match &self.participants {
            Some(map) => Ok(map.get(&chat_id).cloned().unwrap_or_default()),
            None => Err(SourceError::Unsupported("participants")),
        }
    }

    async fn avatar(&self, user_id: i64) -> SourceResult<Option<Vec<u8>>> {
        Ok(self.avatars.get(&user_id).cloned())
    }

    async fn media_bytes(&self, _chat_id: i64, file_ref: &str) -> SourceResult<Vec<u8>> {
        if self.fail_media {
            return Err(SourceError::Other(anyhow::anyhow!("simulated download failure")));
        }
        self.files
            .get(file_ref)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(file_ref.to_string()))
    }
}
