//! Blob storage for source media, masters and waveforms
//!
//! References are content addresses: the SHA-256 of the file plus its
//! extension. Storing the same bytes twice yields the same reference and
//! writes nothing the second time.

use crate::error::{BatchError, BatchResult};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Blob storage
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store the file at `local_path`, returning its reference
    async fn set(&self, local_path: &Path) -> BatchResult<String>;

    /// URL the blob can be read from
    async fn get(&self, blob_ref: &str) -> BatchResult<String>;

    /// Copy the blob to `local_path`
    async fn download(&self, blob_ref: &str, local_path: &Path) -> BatchResult<()>;
}

/// Content-addressed blobs in a local directory, served as `file://` URLs
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

    fn blob_path(&self, blob_ref: &str) -> BatchResult<PathBuf> {
        let valid = !blob_ref.is_empty()
            && blob_ref
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.')
            && !blob_ref.starts_with('.');
        if !valid {
            return Err(BatchError::Blob(format!("invalid blob reference: {:?}", blob_ref)));
        }
        Ok(self.root.join(blob_ref))
    }

    async fn existing_blob(&self, blob_ref: &str) -> BatchResult<PathBuf> {
        let path = self.blob_path(blob_ref)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(BatchError::Blob(format!("no such blob: {}", blob_ref)));
        }
        Ok(path)
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn set(&self, local_path: &Path) -> BatchResult<String> {
        let hash = sha256_file(local_path).await?;
        let blob_ref = match local_path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
                format!("{}.{}", hash, ext.to_ascii_lowercase())
            }
            _ => hash,
        };

        let target = self.blob_path(&blob_ref)?;
        if tokio::fs::try_exists(&target).await? {
            tracing::debug!(blob_ref = %blob_ref, "Blob already stored");
            return Ok(blob_ref);
        }

        tokio::fs::create_dir_all(&self.root).await?;
        let temp = self.root.join(format!(".{}.{}.partial", blob_ref, uuid::Uuid::new_v4()));
        tokio::fs::copy(local_path, &temp).await?;
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }

        tracing::info!(
            blob_ref = %blob_ref,
            source = %local_path.display(),
            "Blob stored"
        );
        Ok(blob_ref)
    }

    async fn get(&self, blob_ref: &str) -> BatchResult<String> {
        let path = self.existing_blob(blob_ref).await?;
        let absolute = tokio::fs::canonicalize(&path).await?;
        Ok(format!("file://{}", absolute.display()))
    }

    async fn download(&self, blob_ref: &str, local_path: &Path) -> BatchResult<()> {
        let path = self.existing_blob(blob_ref).await?;
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&path, local_path).await?;
        Ok(())
    }
}

/// Hex SHA-256 of a file, hashed on the blocking pool in 1MB chunks
pub async fn sha256_file(path: &Path) -> BatchResult<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> BatchResult<String> {
        use std::io::Read;

        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 1024 * 1024];
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    })
    .await
    .map_err(|e| BatchError::WorkerPanicked(format!("hash task: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_set_is_content_addressed() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path().join("blobs"));

        let a = dir.path().join("a.mp3");
        let b = dir.path().join("b.MP3");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();

        let ref_a = store.set(&a).await.unwrap();
        let ref_b = store.set(&b).await.unwrap();

        let expected = format!("{:x}.mp3", Sha256::digest(b"same bytes"));
        assert_eq!(ref_a, expected);
        assert_eq!(ref_a, ref_b);
    }

    #[tokio::test]
    async fn test_get_and_download() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path().join("blobs"));
        let src = dir.path().join("wave.png");
        std::fs::write(&src, b"png-ish").unwrap();

        let blob_ref = store.set(&src).await.unwrap();
        let url = store.get(&blob_ref).await.unwrap();
        assert!(url.starts_with("file://"));
        assert!(url.ends_with(&blob_ref));

        let copy = dir.path().join("out/copy.png");
        store.download(&blob_ref, &copy).await.unwrap();
        assert_eq!(std::fs::read(&copy).unwrap(), b"png-ish");
    }

    #[tokio::test]
    async fn test_rejects_unknown_and_malformed_refs() {
        let dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(dir.path());

        assert!(matches!(store.get("deadbeef.mp3").await, Err(BatchError::Blob(_))));
        assert!(matches!(store.get("../etc/passwd").await, Err(BatchError::Blob(_))));
        assert!(matches!(store.get("").await, Err(BatchError::Blob(_))));
    }
}
