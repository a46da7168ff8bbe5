//! The messaging-backend seam consumed by the sync engine.
//!
//! A [`ChatSource`] hands back raw records; normalization and persistence
//! happen in [`crate::resolve`] and [`crate::store`]. The shipped backend
//! is [`crate::source_export::ExportSource`]; live-API clients implement
//! the same trait.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::models::{RawChannelInfo, RawMessage, RawParticipant, RawPeer};

#[derive(Error, Debug)]
pub enum SourceError {
    /// Transient throttle signal; the caller sleeps `seconds` and retries.
    #[error("rate limited, retry in {seconds}s")]
    RateLimited { seconds: u64 },

    #[error("entity not found: {0}")]
    NotFound(String),

    /// The backend cannot perform this operation at all (not transient).
    #[error("operation not supported by this source: {0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type SourceResult<T> = Result<T, SourceError>;

#[async_trait]
pub trait ChatSource: Send + Sync {
    /// Enumerates the caller's dialogs. Doubles as the entity-cache refresh
    /// required before [`ChatSource::resolve`] can be trusted.
    async fn dialogs(&self) -> SourceResult<Vec<RawPeer>>;

    /// Resolves a chat reference: numeric id, `@username`, or exact title.
    async fn resolve(&self, target: &str) -> SourceResult<RawPeer>;

    /// Extended metadata for a channel or group.
    async fn channel_info(&self, chat_id: i64) -> SourceResult<RawChannelInfo>;

    /// Ascending batch of at most `limit` messages with id > `min_id`.
    async fn messages(
        &self,
        chat_id: i64,
        min_id: i64,
        limit: usize,
    ) -> SourceResult<Vec<RawMessage>>;

    /// Exactly the given ids, ascending; ids the chat lacks are omitted.
    async fn messages_by_id(&self, chat_id: i64, ids: &[i64]) -> SourceResult<Vec<RawMessage>>;

    /// Most recent message of the chat, if any.
    async fn latest_message(&self, chat_id: i64) -> SourceResult<Option<RawMessage>>;

    /// Full member roster. Sources without roster access return
    /// [`SourceError::Unsupported`].
    async fn participants(&self, chat_id: i64) -> SourceResult<Vec<RawParticipant>>;

    /// Profile photo bytes; None when the user has no photo.
    async fn avatar(&self, user_id: i64) -> SourceResult<Option<Vec<u8>>>;

    /// Bytes behind a `file`/`thumb` reference from a raw media record.
    async fn media_bytes(&self, chat_id: i64, file_ref: &str) -> SourceResult<Vec<u8>>;
}

/// Runs a source call, sleeping out rate-limit signals until it resolves.
///
/// The wait is the exact duration the source asked for and there is no
/// retry ceiling; a persistent throttle is expected to eventually clear.
pub async fn with_backoff<T, F, Fut>(mut call: F) -> SourceResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SourceResult<T>>,
{
    loop {
        match call().await {
            Err(SourceError::RateLimited { seconds }) => {
                info!(seconds, "rate limited by source, waiting");
                tokio::time::sleep(Duration::from_secs(seconds)).await;
            }
            other => return other,
        }
    }
}
