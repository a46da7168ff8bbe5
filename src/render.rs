//! HTML rendering for archive pages.
//!
//! All rendering uses [maud](https://maud.lambda.xyz/) for compile-time
//! HTML generation; dynamic values are escaped automatically. The page
//! builder assembles a [`PageContext`] per page and writes the markup
//! this module returns.

use std::collections::HashMap;

use chrono::{Datelike, FixedOffset, NaiveDate};
use maud::{html, Markup, PreEscaped, DOCTYPE};

use crate::config::Config;
use crate::models::{Media, Message, MessageAction, Month};
use crate::progress::format_number;

/// Inline CSS for every archive page.
///
/// Flat design, no external assets. Sidebar holds the month timeline,
/// the main column holds one page of messages grouped by day.
pub const PAGE_CSS: &str = r#"
*{margin:0;padding:0;box-sizing:border-box}
:root{--bg:#fafafa;--fg:#111;--fg2:#555;--fg3:#999;--accent:#0b7285;--surface:#fff;--border:rgba(11,114,133,.18);--mono:ui-monospace,SFMono-Regular,Menlo,monospace}
body{font-family:-apple-system,BlinkMacSystemFont,"Segoe UI",Roboto,sans-serif;line-height:1.6;color:var(--fg);background:var(--bg);display:flex;gap:2rem;padding:1.5rem 1rem;max-width:1100px;margin:0 auto}
a{color:var(--accent);text-decoration:none}
a:hover{text-decoration:underline}
img{max-width:100%;height:auto}

.sidebar{width:220px;flex-shrink:0;font-size:.9rem}
.sidebar h1{font-size:1.2rem;line-height:1.3;margin-bottom:.25rem}
.sidebar .about{color:var(--fg2);font-size:.85rem;margin-bottom:1rem}
.sidebar .feed{font-size:.8rem}
.timeline h4{margin:1rem 0 .25rem;color:var(--fg3);font-weight:600;letter-spacing:.03em}
.timeline ul{list-style:none}
.timeline li{display:flex;justify-content:space-between;gap:.5rem;padding:.1rem 0}
.timeline li.current a{font-weight:700}
.timeline .count{color:var(--fg3);font-size:.8rem;font-variant-numeric:tabular-nums}

main{flex:1;min-width:0}
.month-header h2{font-size:1.5rem;letter-spacing:-.01em}
.month-header .counts{color:var(--fg3);font-size:.9rem;margin-bottom:.5rem}
.days{display:flex;flex-wrap:wrap;gap:.25rem;margin-bottom:1.5rem}
.days a{min-width:2rem;text-align:center;padding:.15rem .3rem;border:1px solid var(--border);border-radius:4px;font-size:.85rem;font-variant-numeric:tabular-nums}
.days a:hover{background:var(--surface);text-decoration:none}

.day{margin-bottom:1.5rem}
.day-label{font-size:.95rem;color:var(--fg2);border-bottom:1px solid var(--border);padding-bottom:.25rem;margin-bottom:.75rem}
.message{display:flex;gap:.75rem;padding:.5rem 0}
.avatar{width:40px;height:40px;border-radius:50%;background:var(--accent);flex-shrink:0;display:flex;align-items:center;justify-content:center;color:#fff;font-weight:700;text-transform:uppercase;overflow:hidden;position:relative}
.avatar img{position:absolute;inset:0;width:100%;height:100%;object-fit:cover}
.body{min-width:0;flex:1}
.meta{display:flex;align-items:baseline;gap:.5rem;font-size:.85rem;flex-wrap:wrap}
.meta .name{font-weight:600;font-size:.95rem}
.meta .username,.meta time{color:var(--fg3)}
.meta .tag{background:var(--surface);border:1px solid var(--border);border-radius:100px;padding:0 .45rem;font-size:.7rem;color:var(--fg3);text-transform:uppercase}
.meta .permalink{color:var(--fg3);font-family:var(--mono);font-size:.75rem}
.content{white-space:pre-wrap;word-break:break-word;margin:.15rem 0}
.action{color:var(--fg3);font-style:italic;font-size:.9rem}
.reply{font-size:.8rem;color:var(--fg3);margin-bottom:.15rem}
.edited{color:var(--fg3);font-size:.75rem}

.media{margin:.35rem 0}
.media img{border-radius:6px;max-height:320px}
.webpage,.document,.contact{display:block;border:1px solid var(--border);border-radius:6px;padding:.6rem .8rem;font-size:.9rem}
.webpage .title,.document .title,.contact .name{font-weight:600}
.webpage .description,.contact .phone{color:var(--fg2);font-size:.85rem}
.poll{border:1px solid var(--border);border-radius:6px;padding:.6rem .8rem;max-width:420px}
.poll .question{font-weight:600;margin-bottom:.4rem}
.poll .option{position:relative;margin:.25rem 0;padding:.2rem .4rem;font-size:.85rem}
.poll .bar{position:absolute;inset:0;background:var(--border);border-radius:4px}
.poll .option span{position:relative}
.poll .percent{float:right;color:var(--fg2);font-variant-numeric:tabular-nums}

.pagination{display:flex;gap:1rem;justify-content:center;margin:2rem 0 1rem;font-size:.9rem}
.pagination .page{color:var(--fg3)}

@media(prefers-color-scheme:dark){
:root{--bg:#0d1117;--fg:#e6edf3;--fg2:#9da7b1;--fg3:#646d76;--accent:#58b7c9;--surface:#161b22;--border:rgba(88,183,201,.2)}
}
@media(max-width:720px){
body{flex-direction:column}
.sidebar{width:100%}
}
"#;

/// Everything one page needs, assembled by the page builder.
pub struct PageContext<'a> {
    pub config: &'a Config,
    pub month: &'a Month,
    pub months: &'a [Month],
    pub days: &'a [crate::models::Day],
    pub messages: &'a [Message],
    /// Message id -> filename of the page it was rendered onto.
    pub page_ids: &'a HashMap<i64, String>,
    pub page: usize,
    pub total_pages: usize,
    pub tz: FixedOffset,
}

/// `2024-03.html` for page 1, `2024-03_2.html` for later pages.
pub fn page_filename(month_slug: &str, page: usize) -> String {
    if page <= 1 {
        format!("{}.html", month_slug)
    } else {
        format!("{}_{}.html", month_slug, page)
    }
}

/// Render one complete archive page.
pub fn render_page(ctx: &PageContext<'_>) -> Markup {
    let title = format!("{} - {}", ctx.month.label, ctx.config.build.site_title);
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                title { (title) }
                @if !ctx.config.build.site_description.is_empty() {
                    meta name="description" content=(ctx.config.build.site_description);
                }
                @if ctx.config.build.publish_feed {
                    link rel="alternate" type="application/rss+xml" title="RSS" href="index.rss";
                }
                style { (PreEscaped(PAGE_CSS)) }
            }
            body {
                nav class="sidebar" {
                    h1 { (ctx.config.build.site_title) }
                    @if !ctx.config.build.site_description.is_empty() {
                        p class="about" { (ctx.config.build.site_description) }
                    }
                    @if ctx.config.build.publish_feed {
                        p class="feed" { a href="index.rss" { "RSS feed" } }
                    }
                    (timeline_nav(ctx))
                }
                main {
                    (month_header(ctx))
                    (day_sections(ctx))
                    (pagination(ctx))
                }
            }
        }
    }
}

/// Month list grouped by year, newest year last.
fn timeline_nav(ctx: &PageContext<'_>) -> Markup {
    let mut years: Vec<(i32, Vec<&Month>)> = Vec::new();
    for month in ctx.months {
        let year = month.date.year();
        match years.last_mut() {
            Some((y, list)) if *y == year => list.push(month),
            _ => years.push((year, vec![month])),
        }
    }
    html! {
        nav class="timeline" {
            @for (year, months) in &years {
                h4 { (year) }
                ul {
                    @for month in months {
                        li class=(if month.slug == ctx.month.slug { "current" } else { "" }) {
                            a href=(page_filename(&month.slug, 1)) { (month.label) }
                            span class="count" { (format_number(month.count.max(0) as u64)) }
                        }
                    }
                }
            }
        }
    }
}

fn month_header(ctx: &PageContext<'_>) -> Markup {
    html! {
        header class="month-header" {
            h2 { (ctx.month.label) }
            p class="counts" { (format_number(ctx.month.count.max(0) as u64)) " messages" }
            nav class="days" {
                @for day in ctx.days {
                    a href=(format!("{}#{}", page_filename(&ctx.month.slug, day.first_page), day.slug))
                        title=(day.label) {
                        (day.date.day())
                    }
                }
            }
        }
    }
}

/// Messages grouped under one heading per local calendar day.
fn day_sections(ctx: &PageContext<'_>) -> Markup {
    let mut sections: Vec<(NaiveDate, Vec<&Message>)> = Vec::new();
    for message in ctx.messages {
        let day = message.date.with_timezone(&ctx.tz).date_naive();
        match sections.last_mut() {
            Some((d, list)) if *d == day => list.push(message),
            _ => sections.push((day, vec![message])),
        }
    }
    html! {
        @for (day, messages) in &sections {
            section class="day" id=(day.format("%Y-%m-%d").to_string()) {
                h3 class="day-label" { (day.format("%d %b %Y").to_string()) }
                @for message in messages {
                    (message_block(message, ctx))
                }
            }
        }
    }
}

fn message_block(message: &Message, ctx: &PageContext<'_>) -> Markup {
    let name = message.user.display_name();
    let initial = name.chars().next().unwrap_or('?').to_uppercase().to_string();
    let local = message.date.with_timezone(&ctx.tz);
    html! {
        article class="message" id=(message.id) {
            div class="avatar" {
                (initial)
                @if let Some(avatar) = &message.user.avatar {
                    img src=(format!("media/{}", avatar)) alt=(name) loading="lazy";
                }
            }
            div class="body" {
                div class="meta" {
                    span class="name" { (name) }
                    @if let Some(username) = &message.user.username {
                        span class="username" { "@" (username) }
                    }
                    @for tag in &message.user.tags {
                        span class="tag" { (tag) }
                    }
                    time datetime=(message.date.to_rfc3339())
                        title=(local.format("%d %b %Y %H:%M").to_string()) {
                        (local.format("%H:%M").to_string())
                    }
                    a class="permalink" href=(format!("#{}", message.id)) { "#" (message.id) }
                    @if message.edit_date.is_some() {
                        span class="edited" { "edited" }
                    }
                }
                @if let Some(reply_to) = message.reply_to {
                    (reply_link(reply_to, ctx))
                }
                @if let Some(action) = &message.action {
                    (action_line(action, &name))
                }
                @if let Some(content) = &message.content {
                    div class="content" { (content) }
                }
                @if let Some(media) = &message.media {
                    div class="media" { (media_block(media)) }
                }
            }
        }
    }
}

/// Deep link to the page the reply target was rendered onto. Targets
/// outside the archive get a plain unlinked marker.
fn reply_link(reply_to: i64, ctx: &PageContext<'_>) -> Markup {
    html! {
        div class="reply" {
            @if let Some(page) = ctx.page_ids.get(&reply_to) {
                a href=(format!("{}#{}", page, reply_to)) { "in reply to #" (reply_to) }
            } @else {
                "in reply to #" (reply_to)
            }
        }
    }
}

fn action_line(action: &MessageAction, name: &str) -> Markup {
    html! {
        div class="action" {
            @match action {
                MessageAction::UserJoined { .. } => { (name) " joined the group" }
                MessageAction::UserLeft => { (name) " left the group" }
            }
        }
    }
}

fn media_block(media: &Media) -> Markup {
    match media {
        Media::Webpage {
            url,
            title,
            description,
        } => html! {
            a class="webpage" href=[url.as_deref()] {
                @if let Some(title) = title {
                    div class="title" { (title) }
                }
                @if let Some(description) = description {
                    div class="description" { (description) }
                }
                @if title.is_none() && description.is_none() {
                    @if let Some(url) = url { div class="title" { (url) } }
                }
            }
        },
        Media::Photo { file, thumb } => html! {
            @if let Some(file) = file {
                a href=(format!("media/{}", file)) {
                    img src=(format!("media/{}", thumb.as_deref().unwrap_or(file))) loading="lazy" alt="photo";
                }
            } @else {
                span class="action" { "photo unavailable" }
            }
        },
        Media::Document { file, thumb, title } => html! {
            @if let Some(file) = file {
                a class="document" href=(format!("media/{}", file)) {
                    @if let Some(thumb) = thumb {
                        img src=(format!("media/{}", thumb)) loading="lazy" alt="";
                    }
                    div class="title" { (title.as_deref().unwrap_or(file)) }
                }
            } @else {
                span class="action" { "document unavailable" }
            }
        },
        Media::Contact { name, phone } => html! {
            div class="contact" {
                div class="name" { (name.as_deref().unwrap_or("contact")) }
                @if let Some(phone) = phone {
                    div class="phone" { (phone) }
                }
            }
        },
        Media::Poll { title, options } => html! {
            div class="poll" {
                @if let Some(title) = title {
                    div class="question" { (title) }
                }
                @for option in options {
                    div class="option" {
                        div class="bar" style=(format!("width:{}%", option.percent.clamp(0.0, 100.0))) {}
                        span { (option.label) }
                        span class="percent" { (option.percent) "% (" (option.count) ")" }
                    }
                }
            }
        },
    }
}

fn pagination(ctx: &PageContext<'_>) -> Markup {
    html! {
        nav class="pagination" {
            @if ctx.page > 1 {
                a href=(page_filename(&ctx.month.slug, ctx.page - 1)) { "newer" }
            }
            span class="page" { "page " (ctx.page) " of " (ctx.total_pages) }
            @if ctx.page < ctx.total_pages {
                a href=(page_filename(&ctx.month.slug, ctx.page + 1)) { "older" }
            }
        }
    }
}
