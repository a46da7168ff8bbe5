use anyhow::{Context, Result};
use chrono::FixedOffset;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub source: SourceConfig,
    pub db: DbConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub build: BuildConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveConfig {
    /// Target chat: numeric id, @username, or exact title.
    pub group: String,
    /// Scopes message rows when several accounts share one archive db.
    #[serde(default)]
    pub owner_id: Option<i64>,
    /// Fixed UTC offset used for month/day bucketing, e.g. "+05:30".
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "+00:00".to_string()
}

impl ArchiveConfig {
    pub fn utc_offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.timezone)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_source_kind")]
    pub kind: String,
    /// Directory holding result.json and the media subdirectories.
    #[serde(default = "default_export_path")]
    pub export_path: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: default_source_kind(),
            export_path: default_export_path(),
        }
    }
}

fn default_source_kind() -> String {
    "export".to_string()
}
fn default_export_path() -> PathBuf {
    PathBuf::from("export")
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_blob_dir")]
    pub blob_dir: PathBuf,
}

fn default_blob_dir() -> PathBuf {
    PathBuf::from("data/blobs")
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_fetch_batch_size")]
    pub fetch_batch_size: usize,
    /// Pause between batches, in seconds.
    #[serde(default = "default_fetch_wait_secs")]
    pub fetch_wait_secs: u64,
    /// Stop after this many messages in one run. 0 means unlimited.
    #[serde(default)]
    pub fetch_limit: u64,
    #[serde(default = "default_true")]
    pub download_media: bool,
    #[serde(default = "default_true")]
    pub download_avatars: bool,
    /// Only download documents whose mime type is listed. Empty allows all.
    #[serde(default)]
    pub media_mime_whitelist: Vec<String>,
    #[serde(default = "default_true")]
    pub fetch_members: bool,
    /// Drop the stored roster before inserting the fresh one.
    #[serde(default = "default_true")]
    pub replace_members: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_batch_size: default_fetch_batch_size(),
            fetch_wait_secs: default_fetch_wait_secs(),
            fetch_limit: 0,
            download_media: true,
            download_avatars: true,
            media_mime_whitelist: Vec::new(),
            fetch_members: true,
            replace_members: true,
        }
    }
}

fn default_fetch_batch_size() -> usize {
    500
}
fn default_fetch_wait_secs() -> u64 {
    5
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct BuildConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Absolute base URL of the published site, without a trailing slash.
    #[serde(default)]
    pub site_url: String,
    #[serde(default = "default_site_title")]
    pub site_title: String,
    #[serde(default)]
    pub site_description: String,
    #[serde(default = "default_true")]
    pub publish_feed: bool,
    #[serde(default = "default_feed_size")]
    pub feed_size: usize,
    /// Extra assets copied into the site's static/ directory.
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            page_size: default_page_size(),
            site_url: String::new(),
            site_title: default_site_title(),
            site_description: String::new(),
            publish_feed: true,
            feed_size: default_feed_size(),
            static_dir: None,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("site")
}
fn default_page_size() -> usize {
    500
}
fn default_site_title() -> String {
    "Chat archive".to_string()
}
fn default_feed_size() -> usize {
    100
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate archive
    if config.archive.group.trim().is_empty() {
        anyhow::bail!("archive.group must be set");
    }
    config
        .archive
        .utc_offset()
        .with_context(|| format!("Bad archive.timezone: '{}'", config.archive.timezone))?;

    // Validate source
    match config.source.kind.as_str() {
        "export" => {}
        other => anyhow::bail!("Unknown source kind: '{}'. Must be export.", other),
    }

    // Validate sync
    if config.sync.fetch_batch_size == 0 {
        anyhow::bail!("sync.fetch_batch_size must be > 0");
    }

    // Validate build
    if config.build.page_size == 0 {
        anyhow::bail!("build.page_size must be > 0");
    }
    if config.build.publish_feed && config.build.site_url.trim().is_empty() {
        anyhow::bail!("build.site_url must be set when build.publish_feed is enabled");
    }
    while config.build.site_url.ends_with('/') {
        config.build.site_url.pop();
    }

    Ok(config)
}

/// Parses a "+HH:MM" / "-HH:MM" offset string.
pub fn parse_utc_offset(s: &str) -> Result<FixedOffset> {
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'+') => (1i32, &s[1..]),
        Some(b'-') => (-1i32, &s[1..]),
        _ => anyhow::bail!("offset must start with + or -"),
    };
    let (hh, mm) = rest
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("offset must look like +HH:MM"))?;
    let hours: i32 = hh.parse().with_context(|| "bad offset hours")?;
    let minutes: i32 = mm.parse().with_context(|| "bad offset minutes")?;
    if hours > 23 || minutes > 59 {
        anyhow::bail!("offset out of range");
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| anyhow::anyhow!("offset out of range"))
}

/// Starter configuration written by `chatvault init`.
pub const SAMPLE_CONFIG: &str = r#"[archive]
# Numeric id, @username, or exact title of the chat to archive.
group = "@mygroup"
# timezone = "+00:00"

[source]
kind = "export"
export_path = "export"

[db]
path = "data/vault.db"

[sync]
fetch_batch_size = 500
fetch_wait_secs = 5
fetch_limit = 0
download_media = true
download_avatars = true

[build]
output_dir = "site"
page_size = 500
site_url = "https://example.com/archive"
site_title = "Chat archive"
site_description = "Archive of our group chat"
feed_size = 100
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let f = write_config(
            r#"
            [archive]
            group = "@mygroup"
            [db]
            path = "data/vault.db"
            [build]
            publish_feed = false
            "#,
        );
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.sync.fetch_batch_size, 500);
        assert_eq!(config.sync.fetch_wait_secs, 5);
        assert_eq!(config.build.page_size, 500);
        assert!(config.sync.download_media);
        assert_eq!(config.archive.timezone, "+00:00");
        assert_eq!(config.source.kind, "export");
    }

    #[test]
    fn site_url_trailing_slash_is_trimmed() {
        let f = write_config(
            r#"
            [archive]
            group = "g"
            [db]
            path = "vault.db"
            [build]
            site_url = "https://example.com/archive/"
            "#,
        );
        let config = load_config(f.path()).unwrap();
        assert_eq!(config.build.site_url, "https://example.com/archive");
    }

    #[test]
    fn feed_without_site_url_is_rejected() {
        let f = write_config(
            r#"
            [archive]
            group = "g"
            [db]
            path = "vault.db"
            "#,
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn offsets_parse() {
        assert_eq!(
            parse_utc_offset("+05:30").unwrap().local_minus_utc(),
            5 * 3600 + 30 * 60
        );
        assert_eq!(
            parse_utc_offset("-08:00").unwrap().local_minus_utc(),
            -8 * 3600
        );
        assert!(parse_utc_offset("05:30").is_err());
        assert!(parse_utc_offset("+5").is_err());
        assert!(parse_utc_offset("+25:00").is_err());
    }

    #[test]
    fn sample_config_parses() {
        let config: Config = toml::from_str(SAMPLE_CONFIG).unwrap();
        assert_eq!(config.archive.group, "@mygroup");
        assert_eq!(config.build.feed_size, 100);
    }
}
