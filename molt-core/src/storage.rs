use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use url::Url;

use crate::models::RenderKind;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("io error at {path}: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    #[error("invalid public url: {0}")]
    InvalidUrl(String),
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

/// Durable home for rendered assets. Returns the public URL of each object.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> ObjectStoreResult<String>;

    fn get_url(&self, key: &str) -> ObjectStoreResult<String>;
}

/// Builds the storage key for one rendered variant.
pub fn asset_key(
    series_id: &str,
    episode_number: i64,
    variant_number: i64,
    kind: RenderKind,
    bytes: &[u8],
) -> String {
    let digest = hex::encode(Sha256::digest(bytes));
    format!(
        "series/{series_id}/ep{episode_number}/v{variant_number}-{}.{}",
        &digest[..12],
        kind.extension()
    )
}

/// Local filesystem store served from `public_base_url`.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    public_base_url: Url,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> ObjectStoreResult<Self> {
        let mut base = public_base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let public_base_url = Url::parse(&base)
            .map_err(|err| ObjectStoreError::InvalidUrl(format!("{public_base_url}: {err}")))?;
        Ok(Self {
            root: root.into(),
            public_base_url,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> ObjectStoreResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

fn validate_key(key: &str) -> ObjectStoreResult<()> {
    if key.is_empty() || key.starts_with('/') {
        return Err(ObjectStoreError::InvalidKey(key.to_string()));
    }
    let escapes = Path::new(key)
        .components()
        .any(|component| !matches!(component, Component::Normal(_)));
    if escapes {
        return Err(ObjectStoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> ObjectStoreResult<String> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| ObjectStoreError::Io {
                    source,
                    path: parent.to_path_buf(),
                })?;
        }
        let staging = path.with_extension("partial");
        let io_err = |source| ObjectStoreError::Io {
            source,
            path: staging.clone(),
        };
        let mut file = fs::File::create(&staging).await.map_err(io_err)?;
        file.write_all(bytes).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);
        fs::rename(&staging, &path)
            .await
            .map_err(|source| ObjectStoreError::Io {
                source,
                path: path.clone(),
            })?;
        debug!(key, bytes = bytes.len(), "stored asset");
        self.get_url(key)
    }

    fn get_url(&self, key: &str) -> ObjectStoreResult<String> {
        validate_key(key)?;
        self.public_base_url
            .join(key)
            .map(|url| url.to_string())
            .map_err(|err| ObjectStoreError::InvalidUrl(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn put_writes_file_and_returns_public_url() {
        let dir = tempdir().unwrap();
        let store = FsObjectStore::new(dir.path(), "https://cdn.example.com/assets").unwrap();
        let url = store.put("series/ser-1/ep1/v1-abc.mp4", b"frames").await.unwrap();
        assert_eq!(url, "https://cdn.example.com/assets/series/ser-1/ep1/v1-abc.mp4");
        let written = std::fs::read(dir.path().join("series/ser-1/ep1/v1-abc.mp4")).unwrap();
        assert_eq!(written, b"frames");
    }

    #[test]
    fn rejects_keys_that_escape_root() {
        let store = FsObjectStore::new("/tmp/molt", "https://cdn.example.com").unwrap();
        assert!(store.get_url("../etc/passwd").is_err());
        assert!(store.get_url("/abs/path").is_err());
        assert!(store.get_url("").is_err());
    }

    #[test]
    fn asset_key_embeds_digest_and_extension() {
        let key = asset_key("ser-1", 2, 1, RenderKind::Audio, b"narration");
        assert!(key.starts_with("series/ser-1/ep2/v1-"));
        assert!(key.ends_with(".m4a"));
        assert_eq!(key.len(), "series/ser-1/ep2/v1-".len() + 12 + ".m4a".len());
    }
}
