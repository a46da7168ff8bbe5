//! # chat-vault
//!
//! An incremental group-chat archiver: sync message history from a chat
//! export into SQLite, then publish the archive as a paginated static
//! site with an RSS feed.
//!
//! Syncs are resumable. The highest archived message id is the cursor,
//! so each run fetches only what is new, and interrupted runs pick up
//! where they stopped. Builds are full rebuilds: deterministic month
//! pages, per-day anchors, externalized media, and a feed of the newest
//! messages.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────┐   ┌─────────────┐
//! │  Source  │──▶│ Sync engine │──▶│  SQLite  │──▶│ Site build  │
//! │ (export) │   │ cursor+batch│   │ + blobs  │   │ HTML + RSS  │
//! └──────────┘   └─────────────┘   └──────────┘   └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! chatvault init                # write a starter config
//! chatvault sync                # archive new messages
//! chatvault build               # render the static site
//! chatvault stats               # what's in the archive
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`source`] | The messaging-backend trait ([`source::ChatSource`]) |
//! | [`source_export`] | Chat source over an export directory |
//! | [`sync`] | Cursor-driven incremental sync engine |
//! | [`resolve`] | Raw record normalization and blob downloads |
//! | [`channels`] | Chat metadata sync, linked-chat chain |
//! | [`members`] | Roster snapshot sync |
//! | [`store`] | SQLite reads and upserts |
//! | [`blobs`] | Avatar and media blob store |
//! | [`timeline`] | Month and day partitioning |
//! | [`build`] | Static-site build pipeline |
//! | [`render`] | HTML page rendering |
//! | [`feed`] | RSS feed writer |
//! | [`progress`] | Sync progress reporting |
//! | [`stats`] | Archive statistics |
//! | [`db`] | Database connection and schema |

pub mod blobs;
pub mod build;
pub mod channels;
pub mod config;
pub mod db;
pub mod feed;
pub mod members;
pub mod models;
pub mod progress;
pub mod render;
pub mod resolve;
pub mod source;
pub mod source_export;
pub mod stats;
pub mod store;
pub mod sync;
pub mod timeline;

#[cfg(test)]
pub(crate) mod testsource;
