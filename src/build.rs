//! Static site builder.
//!
//! Rebuilds the whole site from the store on every run: month pages in
//! chronological order, cursor-paginated within each month, media blobs
//! externalized next to the pages, an index alias of the newest page,
//! and optionally the RSS feed.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::blobs::{AVATARS, MEDIA};
use crate::config::Config;
use crate::feed;
use crate::models::{Media, Message};
use crate::render::{page_filename, render_page, PageContext};
use crate::store::Store;
use crate::timeline::Timeline;

#[derive(Debug, Default)]
pub struct BuildSummary {
    pub months: usize,
    pub pages: usize,
    pub messages: usize,
    pub media_files: u64,
}

pub struct Builder<'a> {
    store: &'a Store,
    config: &'a Config,
}

impl<'a> Builder<'a> {
    pub fn new(store: &'a Store, config: &'a Config) -> Self {
        Self { store, config }
    }

    pub async fn build(&self) -> Result<BuildSummary> {
        let group = &self.config.archive.group;
        let Some(chat_id) = self.store.resolve_chat_ref(group).await? else {
            bail!("chat '{}' is not in the archive yet, run sync first", group);
        };
        let owner_id = self.config.archive.owner_id.unwrap_or(0);
        let tz = self.config.archive.utc_offset()?;
        let page_size = self.config.build.page_size;
        let out = self.config.build.output_dir.as_path();

        // Full rebuild. Pages from months that no longer exist must not
        // survive, so the whole directory goes.
        if out.exists() {
            fs::remove_dir_all(out)
                .with_context(|| format!("clearing output dir {}", out.display()))?;
        }
        fs::create_dir_all(out)
            .with_context(|| format!("creating output dir {}", out.display()))?;

        let timeline = Timeline::load(self.store, chat_id, owner_id, tz, page_size).await?;
        if timeline.is_empty() {
            info!(chat_id, "no messages archived, nothing to build");
            return Ok(BuildSummary::default());
        }

        let media_dir = out.join("media");
        fs::create_dir_all(&media_dir)?;
        if let Some(static_dir) = &self.config.build.static_dir {
            copy_static(static_dir, &out.join("static"))?;
        }

        let mut summary = BuildSummary::default();
        let mut page_ids: HashMap<i64, String> = HashMap::new();
        let mut feed_tail: VecDeque<Message> = VecDeque::new();
        let mut last_page_file: Option<String> = None;

        for month in timeline.months() {
            summary.months += 1;
            let days = timeline.dayline(month.date);
            let (start_ts, end_ts) = timeline.month_window(month.date);
            let total_pages = (month.count.max(0) as usize).div_ceil(page_size);

            let mut after_id = 0i64;
            let mut page = 1usize;
            loop {
                let messages = self
                    .store
                    .messages_page(chat_id, owner_id, start_ts, end_ts, after_id, page_size)
                    .await?;
                let Some(newest) = messages.last().map(|m| m.id) else {
                    break;
                };
                after_id = newest;

                let filename = page_filename(&month.slug, page);
                // Ids map to their page before rendering so same-page
                // replies resolve like cross-page ones.
                for message in &messages {
                    page_ids.insert(message.id, filename.clone());
                }
                summary.media_files += self.externalize_page_media(&messages, &media_dir).await?;

                let ctx = PageContext {
                    config: self.config,
                    month,
                    months: timeline.months(),
                    days,
                    messages: &messages,
                    page_ids: &page_ids,
                    page,
                    total_pages,
                    tz,
                };
                let path = out.join(&filename);
                fs::write(&path, render_page(&ctx).into_string())
                    .with_context(|| format!("writing {}", path.display()))?;
                debug!(file = %filename, count = messages.len(), "wrote page");

                summary.pages += 1;
                summary.messages += messages.len();
                if self.config.build.publish_feed {
                    for message in messages {
                        feed_tail.push_back(message);
                        if feed_tail.len() > self.config.build.feed_size {
                            feed_tail.pop_front();
                        }
                    }
                }
                last_page_file = Some(filename);
                page += 1;
            }
        }

        // The landing page is the newest page of the newest month.
        if let Some(last) = &last_page_file {
            fs::copy(out.join(last), out.join("index.html"))
                .with_context(|| format!("copying {} to index.html", last))?;
        }
        if self.config.build.publish_feed {
            let tail: Vec<Message> = feed_tail.into_iter().collect();
            feed::write_feed(self.config, &tail, &page_ids, out)?;
        }

        info!(
            chat_id,
            months = summary.months,
            pages = summary.pages,
            "site built"
        );
        Ok(summary)
    }

    /// Copies the blobs a page references into the site's media dir.
    /// Blobs that were never downloaded are skipped without noise.
    async fn externalize_page_media(&self, messages: &[Message], media_dir: &Path) -> Result<u64> {
        let blobs = self.store.blobs();
        let mut copied = 0;
        for message in messages {
            if let Some(avatar) = &message.user.avatar {
                if blobs.externalize(AVATARS, avatar, media_dir).await? {
                    copied += 1;
                }
            }
            let (file, thumb) = match &message.media {
                Some(Media::Photo { file, thumb }) => (file.as_deref(), thumb.as_deref()),
                Some(Media::Document { file, thumb, .. }) => (file.as_deref(), thumb.as_deref()),
                _ => (None, None),
            };
            for name in [file, thumb].into_iter().flatten() {
                if blobs.externalize(MEDIA, name, media_dir).await? {
                    copied += 1;
                }
            }
        }
        Ok(copied)
    }
}

fn copy_static(from: &Path, to: &Path) -> Result<()> {
    if !from.is_dir() {
        bail!("build.static_dir '{}' is not a directory", from.display());
    }
    for entry in WalkDir::new(from) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(from)?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let dest = to.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use crate::testsource::test_config;
    use chrono::{DateTime, Utc};
    use tempfile::TempDir;

    fn message(id: i64, date: &str) -> Message {
        Message {
            id,
            chat_id: 10,
            owner_id: 0,
            date: date.parse::<DateTime<Utc>>().unwrap(),
            edit_date: None,
            content: Some(format!("message {}", id)),
            reply_to: None,
            action: None,
            user: User {
                id: 1,
                username: Some("alice".into()),
                first_name: Some("Alice".into()),
                last_name: None,
                phone: None,
                bot: false,
                tags: Vec::new(),
                avatar: None,
            },
            media: None,
        }
    }

    async fn harness() -> (Store, Config, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Store::in_memory(dir.path()).await.unwrap();
        // Every seeded message embeds sender id 1; the users row must
        // exist for the FK and the page JOIN.
        store
            .upsert_user(&message(0, "2024-01-01T00:00:00Z").user)
            .await
            .unwrap();
        let mut config = test_config();
        config.build.output_dir = dir.path().join("site");
        config.build.page_size = 2;
        config.build.publish_feed = false;
        (store, config, dir)
    }

    #[tokio::test]
    async fn three_messages_make_two_pages_and_index_is_the_last() {
        let (store, config, _dir) = harness().await;
        for (id, date) in [
            (1, "2024-03-01T10:00:00Z"),
            (2, "2024-03-01T11:00:00Z"),
            (3, "2024-03-02T09:00:00Z"),
        ] {
            store.upsert_message(&message(id, date)).await.unwrap();
        }

        let summary = Builder::new(&store, &config).build().await.unwrap();
        assert_eq!(summary.pages, 2);
        assert_eq!(summary.months, 1);
        assert_eq!(summary.messages, 3);

        let out = &config.build.output_dir;
        assert!(out.join("2024-03.html").exists());
        assert!(out.join("2024-03_2.html").exists());
        assert_eq!(
            fs::read(out.join("index.html")).unwrap(),
            fs::read(out.join("2024-03_2.html")).unwrap()
        );
    }

    #[tokio::test]
    async fn empty_chat_builds_no_pages_without_error() {
        let (store, config, _dir) = harness().await;
        let summary = Builder::new(&store, &config).build().await.unwrap();
        assert_eq!(summary.pages, 0);
        assert!(config.build.output_dir.exists());
        assert!(!config.build.output_dir.join("index.html").exists());
    }

    #[tokio::test]
    async fn replies_deep_link_across_pages() {
        let (store, config, _dir) = harness().await;
        store
            .upsert_message(&message(1, "2024-03-01T10:00:00Z"))
            .await
            .unwrap();
        store
            .upsert_message(&message(2, "2024-03-01T11:00:00Z"))
            .await
            .unwrap();
        let mut reply = message(3, "2024-03-02T09:00:00Z");
        reply.reply_to = Some(1);
        store.upsert_message(&reply).await.unwrap();

        Builder::new(&store, &config).build().await.unwrap();
        let page2 =
            fs::read_to_string(config.build.output_dir.join("2024-03_2.html")).unwrap();
        assert!(page2.contains(r##"href="2024-03.html#1""##));
    }

    #[tokio::test]
    async fn media_and_avatars_are_externalized() {
        let (store, config, _dir) = harness().await;
        store
            .blobs()
            .put(MEDIA, "10_1.jpg", b"img")
            .await
            .unwrap();
        store
            .blobs()
            .put(AVATARS, "avatar_1.jpg", b"face")
            .await
            .unwrap();

        let mut with_media = message(1, "2024-03-01T10:00:00Z");
        with_media.media = Some(Media::Photo {
            file: Some("10_1.jpg".to_string()),
            thumb: None,
        });
        with_media.user.avatar = Some("avatar_1.jpg".to_string());
        store.upsert_user(&with_media.user).await.unwrap();
        store.upsert_message(&with_media).await.unwrap();

        let summary = Builder::new(&store, &config).build().await.unwrap();
        assert_eq!(summary.media_files, 2);
        let media = config.build.output_dir.join("media");
        assert!(media.join("10_1.jpg").exists());
        assert!(media.join("avatar_1.jpg").exists());
    }

    #[tokio::test]
    async fn rebuild_drops_stale_output() {
        let (store, config, _dir) = harness().await;
        store
            .upsert_message(&message(1, "2024-03-01T10:00:00Z"))
            .await
            .unwrap();

        fs::create_dir_all(&config.build.output_dir).unwrap();
        fs::write(config.build.output_dir.join("2019-01.html"), "stale").unwrap();

        Builder::new(&store, &config).build().await.unwrap();
        assert!(!config.build.output_dir.join("2019-01.html").exists());
        assert!(config.build.output_dir.join("2024-03.html").exists());
    }

    #[tokio::test]
    async fn feed_is_written_when_enabled() {
        let (store, mut config, _dir) = harness().await;
        config.build.publish_feed = true;
        config.build.site_url = "https://example.org".to_string();
        config.build.feed_size = 2;
        for (id, date) in [
            (1, "2024-03-01T10:00:00Z"),
            (2, "2024-03-01T11:00:00Z"),
            (3, "2024-03-02T09:00:00Z"),
        ] {
            store.upsert_message(&message(id, date)).await.unwrap();
        }

        Builder::new(&store, &config).build().await.unwrap();
        let xml =
            fs::read_to_string(config.build.output_dir.join(feed::FEED_FILENAME)).unwrap();
        assert!(xml.contains(r#"<rss version="2.0">"#));
        // Tail of two: ids 2 and 3 only.
        assert!(xml.contains("https://example.org/2024-03_2.html#3"));
        assert!(!xml.contains("#1</guid>"));
    }

    #[tokio::test]
    async fn months_split_into_separate_pages() {
        let (store, config, _dir) = harness().await;
        store
            .upsert_message(&message(1, "2024-03-05T10:00:00Z"))
            .await
            .unwrap();
        store
            .upsert_message(&message(2, "2024-04-05T10:00:00Z"))
            .await
            .unwrap();

        let summary = Builder::new(&store, &config).build().await.unwrap();
        assert_eq!(summary.months, 2);
        let out = &config.build.output_dir;
        assert!(out.join("2024-03.html").exists());
        assert!(out.join("2024-04.html").exists());
        assert_eq!(
            fs::read(out.join("index.html")).unwrap(),
            fs::read(out.join("2024-04.html")).unwrap()
        );
    }

    #[tokio::test]
    async fn static_assets_are_copied() {
        let (store, mut config, dir) = harness().await;
        let assets = dir.path().join("assets");
        fs::create_dir_all(assets.join("fonts")).unwrap();
        fs::write(assets.join("fonts").join("mono.woff2"), b"font").unwrap();
        config.build.static_dir = Some(assets);
        store
            .upsert_message(&message(1, "2024-03-05T10:00:00Z"))
            .await
            .unwrap();

        Builder::new(&store, &config).build().await.unwrap();
        assert!(config
            .build
            .output_dir
            .join("static")
            .join("fonts")
            .join("mono.woff2")
            .exists());
    }
}
