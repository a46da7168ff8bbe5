//! Channel/group metadata sync.
//!
//! Metadata is write-once per id: a chat already present in the store is
//! skipped without overwrite. A broadcast channel may point at a linked
//! discussion group, which is resolved next; the chain carries a visited
//! set and a revisited id aborts as corrupt upstream data.

use std::collections::HashSet;

use anyhow::{bail, Result};
use tracing::info;

use crate::models::Channel;
use crate::source::{with_backoff, ChatSource};
use crate::store::Store;

pub struct ChannelSync<'a> {
    source: &'a dyn ChatSource,
    store: &'a Store,
}

impl<'a> ChannelSync<'a> {
    pub fn new(source: &'a dyn ChatSource, store: &'a Store) -> Self {
        Self { source, store }
    }

    pub async fn sync(&self, chat_id: i64) -> Result<()> {
        let mut visited = HashSet::new();
        let mut next = Some(chat_id);
        while let Some(id) = next {
            if !visited.insert(id) {
                bail!("linked-channel cycle detected at chat {}", id);
            }
            next = self.sync_one(id).await?;
        }
        Ok(())
    }

    /// Archives one chat's metadata. Returns the linked chat id when fresh
    /// metadata was written and the link needs resolving too.
    async fn sync_one(&self, chat_id: i64) -> Result<Option<i64>> {
        if self.store.channel_exists(chat_id).await? {
            return Ok(None);
        }

        let info = with_backoff(|| self.source.channel_info(chat_id)).await?;

        let kind_flags = [info.broadcast, info.megagroup, info.gigagroup]
            .iter()
            .filter(|set| **set)
            .count();
        if kind_flags != 1 {
            bail!(
                "chat {} reports {} kind flags, expected exactly one of broadcast/megagroup/gigagroup",
                chat_id,
                kind_flags
            );
        }

        // Fetched only to record when the chat was last active.
        let last = with_backoff(|| self.source.latest_message(chat_id)).await?;

        let channel = Channel {
            id: info.id,
            username: info.username.clone(),
            title: info.title.clone(),
            about: info.about.clone(),
            member_count: info.member_count,
            created_at: info.created_at,
            last_message_at: last.map(|m| m.date),
            broadcast: info.broadcast,
            megagroup: info.megagroup,
            gigagroup: info.gigagroup,
            linked_chat_id: info.linked_chat_id,
        };
        self.store.upsert_channel(&channel).await?;
        info!(chat_id, title = ?channel.title, "archived channel metadata");

        Ok(info.linked_chat_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawChannelInfo, RawMessage};
    use crate::testsource::{raw_message, TestSource};
    use tempfile::TempDir;

    fn info(id: i64, kind: &str, linked: Option<i64>) -> RawChannelInfo {
        RawChannelInfo {
            id,
            username: Some(format!("chan{}", id)),
            title: Some(format!("Channel {}", id)),
            about: None,
            member_count: Some(12),
            created_at: None,
            broadcast: kind == "broadcast",
            megagroup: kind == "megagroup",
            gigagroup: kind == "gigagroup",
            linked_chat_id: linked,
        }
    }

    async fn store() -> (crate::store::Store, TempDir) {
        let dir = TempDir::new().unwrap();
        (crate::store::Store::in_memory(dir.path()).await.unwrap(), dir)
    }

    #[tokio::test]
    async fn linked_chain_is_archived() {
        let (store, _dir) = store().await;
        let mut source = TestSource::new();
        source.infos.insert(100, info(100, "broadcast", Some(200)));
        source.infos.insert(200, info(200, "megagroup", None));
        let msgs: Vec<RawMessage> = vec![raw_message(1, 1, "hi"), raw_message(9, 2, "latest")];
        source.messages.insert(100, msgs);

        ChannelSync::new(&source, &store).sync(100).await.unwrap();

        let broadcast = store.channel(100).await.unwrap().unwrap();
        assert_eq!(broadcast.linked_chat_id, Some(200));
        assert!(broadcast.broadcast);
        assert_eq!(
            broadcast.last_message_at,
            Some(raw_message(9, 2, "").date)
        );
        assert!(store.channel(200).await.unwrap().unwrap().megagroup);
    }

    #[tokio::test]
    async fn ambiguous_kind_flags_are_fatal() {
        let (store, _dir) = store().await;
        let mut source = TestSource::new();
        let mut bad = info(100, "broadcast", None);
        bad.megagroup = true;
        source.infos.insert(100, bad);

        let err = ChannelSync::new(&source, &store).sync(100).await.unwrap_err();
        assert!(err.to_string().contains("kind flags"));
        assert!(!store.channel_exists(100).await.unwrap());
    }

    #[tokio::test]
    async fn linked_cycle_is_fatal() {
        let (store, _dir) = store().await;
        let mut source = TestSource::new();
        source.infos.insert(100, info(100, "broadcast", Some(200)));
        source.infos.insert(200, info(200, "megagroup", Some(100)));

        let err = ChannelSync::new(&source, &store).sync(100).await.unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[tokio::test]
    async fn archived_metadata_is_not_overwritten() {
        let (store, _dir) = store().await;
        let seeded = Channel {
            id: 100,
            username: None,
            title: Some("Original".to_string()),
            about: None,
            member_count: None,
            created_at: None,
            last_message_at: None,
            broadcast: false,
            megagroup: true,
            gigagroup: false,
            linked_chat_id: None,
        };
        store.upsert_channel(&seeded).await.unwrap();

        let mut source = TestSource::new();
        source.infos.insert(100, info(100, "broadcast", None));
        ChannelSync::new(&source, &store).sync(100).await.unwrap();

        let kept = store.channel(100).await.unwrap().unwrap();
        assert_eq!(kept.title.as_deref(), Some("Original"));
        assert!(kept.megagroup);
    }
}
