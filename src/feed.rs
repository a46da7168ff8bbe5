//! RSS feed generation.
//!
//! Writes a single RSS 2.0 `index.rss` covering the newest archived
//! messages. Entry links point at the paginated site, anchor included,
//! so feed readers land on the exact message.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::config::Config;
use crate::models::{Media, Message};

pub const FEED_FILENAME: &str = "index.rss";

/// Writes the feed. `messages` is the ascending tail of the render
/// stream; items are emitted newest first. `page_ids` maps message ids
/// to the page file each one was rendered onto.
pub fn write_feed(
    config: &Config,
    messages: &[Message],
    page_ids: &HashMap<i64, String>,
    out_dir: &Path,
) -> Result<()> {
    let path = out_dir.join(FEED_FILENAME);
    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = Writer::new_with_indent(BufWriter::new(file), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    writer.write_event(Event::Start(rss))?;
    writer.write_event(Event::Start(BytesStart::new("channel")))?;

    text_element(&mut writer, "title", &config.build.site_title)?;
    text_element(&mut writer, "link", &config.build.site_url)?;
    text_element(&mut writer, "description", &config.build.site_description)?;
    text_element(&mut writer, "lastBuildDate", &Utc::now().to_rfc2822())?;

    let tz = config.archive.utc_offset()?;
    for message in messages.iter().rev() {
        let page = page_ids
            .get(&message.id)
            .map(String::as_str)
            .unwrap_or_default();
        let link = format!("{}/{}#{}", config.build.site_url, page, message.id);

        writer.write_event(Event::Start(BytesStart::new("item")))?;
        let title = format!(
            "{} @ {} (#{})",
            message.user.display_name(),
            message.date.with_timezone(&tz).format("%d %b %Y %H:%M"),
            message.id
        );
        text_element(&mut writer, "title", &title)?;
        text_element(&mut writer, "link", &link)?;

        let mut guid = BytesStart::new("guid");
        guid.push_attribute(("isPermaLink", "true"));
        writer.write_event(Event::Start(guid))?;
        writer.write_event(Event::Text(BytesText::new(&link)))?;
        writer.write_event(Event::End(BytesEnd::new("guid")))?;

        let description = message
            .content
            .clone()
            .or_else(|| message.media.as_ref().and_then(|m| m.title()))
            .unwrap_or_default();
        text_element(&mut writer, "description", &description)?;
        text_element(&mut writer, "pubDate", &message.date.to_rfc2822())?;

        // Mirrors the enclosure shape feed readers expect even though
        // blob sizes are not tracked.
        if let Some(file) = media_file(message) {
            let mut enclosure = BytesStart::new("enclosure");
            let url = format!("{}/media/{}", config.build.site_url, file);
            enclosure.push_attribute(("url", url.as_str()));
            enclosure.push_attribute(("length", "0"));
            enclosure.push_attribute(("type", "application/octet-stream"));
            writer.write_event(Event::Empty(enclosure))?;
        }
        writer.write_event(Event::End(BytesEnd::new("item")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("channel")))?;
    writer.write_event(Event::End(BytesEnd::new("rss")))?;
    writer.into_inner().flush()?;
    Ok(())
}

fn text_element<W: std::io::Write>(writer: &mut Writer<W>, name: &str, value: &str) -> Result<()> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn media_file(message: &Message) -> Option<&str> {
    match &message.media {
        Some(Media::Photo { file: Some(f), .. }) => Some(f),
        Some(Media::Document { file: Some(f), .. }) => Some(f),
        _ => None,
    }
}
