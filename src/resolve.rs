//! Entity Resolver: turns raw source records into canonical entities and
//! writes them through the store, relaying blobs on the way.
//!
//! Avatar and media downloads are best-effort. A failed download logs a
//! warning and leaves the field empty; it never aborts the batch. Rate
//! limits are slept out inside [`with_backoff`] and stay invisible here.

use std::path::Path;

use anyhow::Result;
use tracing::{debug, warn};

use crate::blobs;
use crate::config::Config;
use crate::models::{
    Media, MessageAction, PollOption, RawAction, RawMedia, RawMessage, RawPollOption, RawUser,
    User,
};
use crate::source::{with_backoff, ChatSource};
use crate::store::Store;

pub struct Resolver<'a> {
    source: &'a dyn ChatSource,
    store: &'a Store,
    config: &'a Config,
}

impl<'a> Resolver<'a> {
    pub fn new(source: &'a dyn ChatSource, store: &'a Store, config: &'a Config) -> Self {
        Self {
            source,
            store,
            config,
        }
    }

    /// Resolves and persists a user. The store is the dedup boundary:
    /// an id that is already archived is returned as-is, with no avatar
    /// refetch, so resumed syncs stay cheap.
    pub async fn user(&self, raw: &RawUser) -> Result<User> {
        if let Some(existing) = self.store.user(raw.id).await? {
            return Ok(existing);
        }

        let avatar = if self.config.sync.download_avatars {
            self.fetch_avatar(raw.id).await
        } else {
            None
        };

        let mut tags = Vec::new();
        if raw.bot {
            tags.push("bot".to_string());
        }
        if raw.scam {
            tags.push("scam".to_string());
        }
        if raw.fake {
            tags.push("fake".to_string());
        }

        let user = User {
            id: raw.id,
            username: raw.username.clone(),
            first_name: raw.first_name.clone(),
            last_name: raw.last_name.clone(),
            phone: raw.phone.clone(),
            bot: raw.bot,
            tags,
            avatar,
        };
        self.store.upsert_user(&user).await?;
        Ok(user)
    }

    /// Message text, or the sticker placeholder for sticker messages.
    pub fn content(&self, raw: &RawMessage) -> Option<String> {
        if let Some(RawMedia::Sticker { emoji }) = &raw.media {
            return Some(match emoji {
                Some(e) => format!("{} (sticker)", e),
                None => "(sticker)".to_string(),
            });
        }
        if raw.text.is_empty() {
            None
        } else {
            Some(raw.text.clone())
        }
    }

    /// Normalizes an attachment, downloading bodies and thumbnails into
    /// the blob store when downloads are enabled.
    pub async fn media(&self, chat_id: i64, message: &RawMessage) -> Option<Media> {
        let raw = message.media.as_ref()?;
        match raw {
            RawMedia::Webpage {
                url,
                title,
                description,
            } => Some(Media::Webpage {
                url: url.clone(),
                title: title.clone(),
                description: description.clone(),
            }),
            RawMedia::Contact {
                first_name,
                last_name,
                phone,
            } => {
                let name = match (first_name, last_name) {
                    (Some(f), Some(l)) => Some(format!("{} {}", f, l)),
                    (Some(f), None) => Some(f.clone()),
                    (None, Some(l)) => Some(l.clone()),
                    (None, None) => None,
                };
                Some(Media::Contact {
                    name,
                    phone: phone.clone(),
                })
            }
            RawMedia::Poll {
                question,
                options,
                total_voters,
            } => Some(poll_media(question, options, *total_voters)),
            RawMedia::Sticker { .. } => None,
            RawMedia::Photo { file, thumb } => {
                if !self.config.sync.download_media {
                    return None;
                }
                match self.download_pair(chat_id, message.id, file, thumb).await {
                    Ok((file, thumb)) => Some(Media::Photo { file, thumb }),
                    Err(e) => {
                        warn!(chat_id, message_id = message.id, error = %e,
                              "media download failed, leaving attachment empty");
                        None
                    }
                }
            }
            RawMedia::Document {
                file,
                thumb,
                name,
                mime,
            } => {
                if !self.config.sync.download_media {
                    return None;
                }
                if !self.mime_allowed(mime.as_deref()) {
                    debug!(chat_id, message_id = message.id, mime = ?mime,
                           "document mime not whitelisted, skipping");
                    return None;
                }
                match self.download_pair(chat_id, message.id, file, thumb).await {
                    Ok((file, thumb)) => Some(Media::Document {
                        file,
                        thumb,
                        title: name.clone(),
                    }),
                    Err(e) => {
                        warn!(chat_id, message_id = message.id, error = %e,
                              "media download failed, leaving attachment empty");
                        None
                    }
                }
            }
        }
    }

    /// Normalizes a system action, resolving the referenced user first.
    pub async fn action(&self, raw: &RawAction) -> Result<MessageAction> {
        match raw {
            RawAction::UserJoined { user } => {
                let user = self.user(user).await?;
                Ok(MessageAction::UserJoined { to_user: user.id })
            }
            RawAction::UserLeft => Ok(MessageAction::UserLeft),
        }
    }

    async fn fetch_avatar(&self, user_id: i64) -> Option<String> {
        let bytes = match with_backoff(|| self.source.avatar(user_id)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(user_id, error = %e, "avatar download failed");
                return None;
            }
        };
        let name = format!("avatar_{}.jpg", user_id);
        match self.store.blobs().put(blobs::AVATARS, &name, &bytes).await {
            Ok(_) => Some(name),
            Err(e) => {
                warn!(user_id, error = %e, "failed to store avatar");
                None
            }
        }
    }

    async fn download_pair(
        &self,
        chat_id: i64,
        message_id: i64,
        file: &Option<String>,
        thumb: &Option<String>,
    ) -> Result<(Option<String>, Option<String>)> {
        let file_name = match file {
            Some(file_ref) => {
                let name = format!("{}_{}.{}", chat_id, message_id, ext_of(file_ref, "bin"));
                self.download_into(chat_id, file_ref, &name).await?;
                Some(name)
            }
            None => None,
        };
        let thumb_name = match thumb {
            Some(thumb_ref) => {
                let name = format!(
                    "thumb_{}_{}.{}",
                    chat_id,
                    message_id,
                    ext_of(thumb_ref, "jpg")
                );
                self.download_into(chat_id, thumb_ref, &name).await?;
                Some(name)
            }
            None => None,
        };
        Ok((file_name, thumb_name))
    }

    async fn download_into(&self, chat_id: i64, file_ref: &str, name: &str) -> Result<()> {
        if self.store.blobs().exists(blobs::MEDIA, name).await {
            debug!(name, "media blob already present, skipping download");
            return Ok(());
        }
        let bytes = with_backoff(|| self.source.media_bytes(chat_id, file_ref)).await?;
        self.store.blobs().put(blobs::MEDIA, name, &bytes).await?;
        Ok(())
    }

    fn mime_allowed(&self, mime: Option<&str>) -> bool {
        let whitelist = &self.config.sync.media_mime_whitelist;
        if whitelist.is_empty() {
            return true;
        }
        mime.map(|m| whitelist.iter().any(|w| w == m))
            .unwrap_or(false)
    }
}

/// Poll snapshot with per-option percentages of the total vote count.
fn poll_media(question: &str, options: &[RawPollOption], total_voters: Option<i64>) -> Media {
    let total = total_voters.unwrap_or_else(|| options.iter().map(|o| o.votes).sum());
    let options = options
        .iter()
        .map(|o| {
            let percent = if total > 0 {
                (o.votes as f64 * 100.0 / total as f64 * 100.0).round() / 100.0
            } else {
                0.0
            };
            PollOption {
                label: o.label.clone(),
                count: o.votes,
                percent,
            }
        })
        .collect();
    Media::Poll {
        title: Some(question.to_string()),
        options,
    }
}

fn ext_of(file_ref: &str, fallback: &str) -> String {
    Path::new(file_ref)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.len() <= 8)
        .unwrap_or(fallback)
        .to_ascii_lowercase()
}
