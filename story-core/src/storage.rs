//! Blob storage for exported stories.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid key '{0}'")]
    InvalidKey(String),

    #[error("No blob stored under '{0}'")]
    NotFound(String),
}

/// Opaque key/value blob store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key` and return a URL for it.
    async fn upload(&self, bytes: &[u8], key: &str) -> Result<String, StorageError>;

    /// Fetch the bytes stored under `key`.
    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError>;
}

/// Stores blobs as files below a root directory.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for a key. Keys are relative, `/`-separated and may not climb
    /// out of the root.
    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        let valid = !key.trim().is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn upload(&self, bytes: &[u8], key: &str) -> Result<String, StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;
        tracing::info!(key, bytes = bytes.len(), "Blob stored");

        let absolute = fs::canonicalize(&path).await?;
        Ok(format!("file://{}", absolute.display()))
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_upload_then_download() {
        let dir = tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());

        let url = store.upload(b"{\"ok\":true}", "stories/one.json").await.unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("one.json"));

        let bytes = store.download("stories/one.json").await.unwrap();
        assert_eq!(bytes, b"{\"ok\":true}");
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());

        for key in ["../outside.json", "/etc/passwd", "", "a/../../b"] {
            assert!(matches!(
                store.upload(b"x", key).await,
                Err(StorageError::InvalidKey(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_missing_blob() {
        let dir = tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        assert!(matches!(
            store.download("nothing.json").await,
            Err(StorageError::NotFound(_))
        ));
    }
}
