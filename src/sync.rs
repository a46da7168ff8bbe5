//! Message sync engine.
//!
//! Pulls messages out of a [`ChatSource`] in ascending-id batches and
//! upserts them into the store. The cursor is the highest archived id
//! per chat and owner, so an interrupted run resumes exactly where the
//! last committed batch left off.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use crate::channels::ChannelSync;
use crate::config::Config;
use crate::members::MemberSync;
use crate::models::{Message, RawMessage};
use crate::progress::{SyncProgressEvent, SyncProgressReporter};
use crate::resolve::Resolver;
use crate::source::{with_backoff, ChatSource, SourceError};
use crate::store::Store;

pub struct Syncer<'a> {
    source: &'a dyn ChatSource,
    store: &'a Store,
    config: &'a Config,
    progress: &'a dyn SyncProgressReporter,
}

impl<'a> Syncer<'a> {
    pub fn new(
        source: &'a dyn ChatSource,
        store: &'a Store,
        config: &'a Config,
        progress: &'a dyn SyncProgressReporter,
    ) -> Self {
        Self {
            source,
            store,
            config,
            progress,
        }
    }

    /// Syncs every group-like dialog the account can see.
    pub async fn sync_all(&self) -> Result<u64> {
        let dialogs = with_backoff(|| self.source.dialogs())
            .await
            .context("listing dialogs")?;
        let groups: Vec<_> = dialogs
            .into_iter()
            .filter(|peer| peer.kind.is_group())
            .collect();
        info!(count = groups.len(), "syncing all group dialogs");

        let mut total = 0;
        for peer in groups {
            total += self.sync(&peer.id.to_string(), None).await?;
        }
        Ok(total)
    }

    /// Syncs one chat. `target` is an id, @username, or title; `ids`
    /// restricts the run to those message ids instead of the cursor.
    /// Returns the number of messages written.
    pub async fn sync(&self, target: &str, ids: Option<&[i64]>) -> Result<u64> {
        self.progress.report(SyncProgressEvent::Resolving {
            target: target.to_string(),
        });

        // Enumerating dialogs first primes the source's peer cache so
        // names and usernames resolve on a cold session.
        with_backoff(|| self.source.dialogs())
            .await
            .context("listing dialogs")?;
        let peer = match with_backoff(|| self.source.resolve(target)).await {
            Ok(peer) => peer,
            Err(SourceError::NotFound(_)) => {
                bail!("cannot resolve chat '{}': not found or not accessible", target)
            }
            Err(err) => return Err(err.into()),
        };
        if !peer.kind.is_group() {
            info!(target, peer_id = peer.id, "target is a direct-message peer, skipping");
            return Ok(0);
        }
        let chat_id = peer.id;

        ChannelSync::new(self.source, self.store).sync(chat_id).await?;
        if self.config.sync.fetch_members {
            MemberSync::new(self.source, self.store, self.config)
                .sync(chat_id)
                .await?;
        }

        let owner_id = self.config.archive.owner_id.unwrap_or(0);
        let fetched = match ids {
            Some(ids) => self.fetch_explicit(chat_id, owner_id, ids).await?,
            None => self.fetch_from_cursor(chat_id, owner_id).await?,
        };

        self.progress
            .report(SyncProgressEvent::Synced { chat_id, fetched });
        info!(chat_id, fetched, "sync complete");
        Ok(fetched)
    }

    /// The main loop: fetch batches above the stored cursor until one
    /// comes back empty. Every batch is committed before the cursor
    /// advances, so a crash mid-run costs at most the current batch.
    async fn fetch_from_cursor(&self, chat_id: i64, owner_id: i64) -> Result<u64> {
        let (mut last_id, last_date) = self.store.max_message_id(chat_id, owner_id).await?;
        match last_date {
            Some(date) => info!(chat_id, last_id, %date, "resuming after last archived message"),
            None => info!(chat_id, "chat has no archived messages yet, fetching from the start"),
        }

        let batch_size = self.config.sync.fetch_batch_size;
        let limit = self.config.sync.fetch_limit;
        let wait = Duration::from_secs(self.config.sync.fetch_wait_secs);
        let resolver = Resolver::new(self.source, self.store, self.config);

        let mut fetched = 0u64;
        loop {
            let batch = with_backoff(|| self.source.messages(chat_id, last_id, batch_size))
                .await
                .context("fetching message batch")?;
            let Some(newest) = batch.last().map(|m| m.id) else {
                break;
            };
            for raw in &batch {
                if self.ingest(&resolver, chat_id, owner_id, raw).await? {
                    fetched += 1;
                    if fetched % 300 == 0 {
                        info!(chat_id, fetched, "fetched messages");
                    }
                }
            }
            last_id = newest;
            self.progress
                .report(SyncProgressEvent::Fetched { chat_id, fetched });

            // The cap applies at batch boundaries; a committed batch is
            // never split.
            if limit > 0 && fetched >= limit {
                info!(chat_id, fetched, limit, "fetch limit reached, stopping");
                break;
            }
            tokio::time::sleep(wait).await;
        }
        Ok(fetched)
    }

    /// Re-fetches exactly the requested ids, e.g. to repair holes or
    /// pick up edits. The cursor is not consulted or advanced.
    async fn fetch_explicit(&self, chat_id: i64, owner_id: i64, ids: &[i64]) -> Result<u64> {
        info!(chat_id, count = ids.len(), "fetching explicitly requested message ids");
        let batch = with_backoff(|| self.source.messages_by_id(chat_id, ids))
            .await
            .context("fetching requested message ids")?;

        let resolver = Resolver::new(self.source, self.store, self.config);
        let mut fetched = 0u64;
        for raw in &batch {
            if self.ingest(&resolver, chat_id, owner_id, raw).await? {
                fetched += 1;
            }
        }
        Ok(fetched)
    }

    /// Resolves one raw message and writes it. Returns false when the
    /// message carries no sender and is dropped.
    async fn ingest(
        &self,
        resolver: &Resolver<'_>,
        chat_id: i64,
        owner_id: i64,
        raw: &RawMessage,
    ) -> Result<bool> {
        let Some(sender) = &raw.sender else {
            debug!(chat_id, id = raw.id, "skipping message without sender");
            return Ok(false);
        };

        // Users referenced by a service action are archived before the
        // message that points at them.
        let action = match &raw.action {
            Some(raw_action) => Some(resolver.action(raw_action).await?),
            None => None,
        };
        let user = resolver.user(sender).await?;
        let media = resolver.media(chat_id, raw).await;

        let message = Message {
            id: raw.id,
            chat_id,
            owner_id,
            date: raw.date,
            edit_date: raw.edit_date,
            content: resolver.content(raw),
            reply_to: raw.reply_to,
            action,
            user,
            media,
        };
        self.store.upsert_message(&message).await?;
        Ok(true)
    }
}
