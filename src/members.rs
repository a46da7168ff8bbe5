//! Member roster sync.
//!
//! A broadcast channel's subscribers are not enumerable; when it has a
//! linked discussion group the roster is synced against that group
//! instead. The fetched roster replaces the stored one wholesale when
//! `sync.replace_members` is set.

use anyhow::Result;
use tracing::info;

use crate::config::Config;
use crate::models::GroupUser;
use crate::resolve::Resolver;
use crate::source::{with_backoff, ChatSource, SourceError};
use crate::store::Store;

pub struct MemberSync<'a> {
    source: &'a dyn ChatSource,
    store: &'a Store,
    config: &'a Config,
}

impl<'a> MemberSync<'a> {
    pub fn new(source: &'a dyn ChatSource, store: &'a Store, config: &'a Config) -> Self {
        Self {
            source,
            store,
            config,
        }
    }

    pub async fn sync(&self, chat_id: i64) -> Result<()> {
        let (broadcast, linked) = match self.store.channel(chat_id).await? {
            Some(channel) => (channel.broadcast, channel.linked_chat_id),
            None => {
                let raw = with_backoff(|| self.source.channel_info(chat_id)).await?;
                (raw.broadcast, raw.linked_chat_id)
            }
        };

        let target = if broadcast {
            match linked {
                Some(linked) => linked,
                None => {
                    info!(chat_id, "broadcast channel has no linked group, skipping member sync");
                    return Ok(());
                }
            }
        } else {
            chat_id
        };

        let participants = match with_backoff(|| self.source.participants(target)).await {
            Ok(participants) => participants,
            Err(SourceError::Unsupported(op)) => {
                info!(chat_id = target, op, "source cannot enumerate members, skipping");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        // Full roster is in hand before the old snapshot is dropped.
        if self.config.sync.replace_members {
            let dropped = self.store.delete_group_users(target).await?;
            if dropped > 0 {
                info!(chat_id = target, dropped, "cleared previous member roster");
            }
        }

        let resolver = Resolver::new(self.source, self.store, self.config);
        let mut count = 0u64;
        for participant in &participants {
            let user = resolver.user(&participant.user).await?;
            self.store
                .upsert_group_user(&GroupUser {
                    group_id: target,
                    user,
                    creator: participant.creator,
                    admin: participant.admin,
                })
                .await?;
            count += 1;
        }
        info!(chat_id = target, count, "archived member roster");
        Ok(())
    }
}
