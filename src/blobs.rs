//! Filesystem blob storage for avatars, media bodies, and thumbnails.
//!
//! Blobs are addressed by `(collection, name)` where the name is derived
//! from the owning entity (`avatar_{user_id}.jpg`, `{chat_id}_{msg_id}.ext`,
//! `thumb_{chat_id}_{msg_id}.ext`), so a re-download of the same entity
//! lands on the same path and can be skipped.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use tokio::fs;
use tracing::debug;

pub const AVATARS: &str = "avatars";
pub const MEDIA: &str = "media";

#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes a blob unless it is already present. Returns false on skip.
    pub async fn put(&self, collection: &str, name: &str, data: &[u8]) -> Result<bool> {
        let path = self.blob_path(collection, name)?;
        if fs::try_exists(&path).await.unwrap_or(false) {
            debug!(collection, name, "blob already stored, skipping");
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;
        debug!(collection, name, size = data.len(), "stored blob");
        Ok(true)
    }

    pub async fn exists(&self, collection: &str, name: &str) -> bool {
        match self.blob_path(collection, name) {
            Ok(path) => fs::try_exists(&path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Copies a stored blob into `dest_dir/name` for the static site.
    /// Returns true only when a copy was actually made.
    ///
    /// Skips silently when the destination already exists or the blob was
    /// never stored (a failed best-effort download leaves no blob behind).
    pub async fn externalize(&self, collection: &str, name: &str, dest_dir: &Path) -> Result<bool> {
        let src = self.blob_path(collection, name)?;
        if !fs::try_exists(&src).await.unwrap_or(false) {
            debug!(collection, name, "blob missing, nothing to externalize");
            return Ok(false);
        }
        let dest = dest_dir.join(name);
        if fs::try_exists(&dest).await.unwrap_or(false) {
            return Ok(false);
        }
        fs::create_dir_all(dest_dir).await?;
        fs::copy(&src, &dest).await?;
        debug!(collection, name, "externalized blob");
        Ok(true)
    }

    /// Blob path with traversal characters rejected.
    fn blob_path(&self, collection: &str, name: &str) -> Result<PathBuf> {
        for part in [collection, name] {
            if part.is_empty()
                || part.contains('/')
                || part.contains('\\')
                || part.contains("..")
            {
                bail!("invalid blob name: '{}'", part);
            }
        }
        Ok(self.root.join(collection).join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (BlobStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path().join("blobs"));
        (store, dir)
    }

    #[tokio::test]
    async fn put_then_skip() {
        let (store, _dir) = test_store();
        assert!(store.put(MEDIA, "1_2.jpg", b"bytes").await.unwrap());
        assert!(store.exists(MEDIA, "1_2.jpg").await);
        // Second put of the same name is a no-op.
        assert!(!store.put(MEDIA, "1_2.jpg", b"other").await.unwrap());
    }

    #[tokio::test]
    async fn externalize_is_idempotent() {
        let (store, dir) = test_store();
        store.put(AVATARS, "avatar_9.jpg", b"img").await.unwrap();

        let out = dir.path().join("site").join("media");
        assert!(store.externalize(AVATARS, "avatar_9.jpg", &out).await.unwrap());
        assert!(out.join("avatar_9.jpg").exists());

        // Overwrite the output copy, re-externalize, copy must survive.
        std::fs::write(out.join("avatar_9.jpg"), b"edited").unwrap();
        assert!(!store.externalize(AVATARS, "avatar_9.jpg", &out).await.unwrap());
        assert_eq!(std::fs::read(out.join("avatar_9.jpg")).unwrap(), b"edited");
    }

    #[tokio::test]
    async fn externalize_missing_blob_is_quiet() {
        let (store, dir) = test_store();
        let out = dir.path().join("media");
        assert!(!store.externalize(MEDIA, "absent.bin", &out).await.unwrap());
        assert!(!out.join("absent.bin").exists());
    }

    #[tokio::test]
    async fn traversal_names_rejected() {
        let (store, _dir) = test_store();
        assert!(store.put(MEDIA, "../escape", b"x").await.is_err());
        assert!(store.put("bad/collection", "f", b"x").await.is_err());
    }
}
