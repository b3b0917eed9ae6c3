//! Object store for donation images.
//!
//! The coordinator only sees the [`ObjectStore`] trait. [`FsObjectStore`]
//! keeps blobs on the local filesystem below a container directory and hands
//! out URLs under a configured base URL.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::errors::AppError;
use crate::models::ImageUpload;

/// Blob storage used for donation images.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under a fresh blob name derived from `name` and return
    /// its public URL.
    async fn put(&self, name: &str, bytes: &[u8], content_type: &str) -> Result<String, AppError>;

    /// Remove the blob behind `url`. An empty URL is a no-op.
    async fn delete(&self, url: &str) -> Result<(), AppError>;
}

/// Upload an optional image. No file yields an empty URL.
pub async fn upload_image(
    store: &dyn ObjectStore,
    image: Option<&ImageUpload>,
) -> Result<String, AppError> {
    match image {
        Some(image) => {
            store
                .put(&image.file_name, &image.bytes, &image.content_type)
                .await
        }
        None => Ok(String::new()),
    }
}

/// Filesystem-backed object store.
pub struct FsObjectStore {
    root: PathBuf,
    base_url: String,
    container: String,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, base_url: &str, container: &str) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            container: container.to_string(),
        }
    }

    fn container_dir(&self) -> PathBuf {
        self.root.join(&self.container)
    }

    fn url_prefix(&self) -> String {
        format!("{}/{}/", self.base_url, self.container)
    }

    /// Map a URL handed out by this store back to its blob path.
    fn blob_path(&self, url: &str) -> Result<PathBuf, AppError> {
        let blob = url
            .strip_prefix(&self.url_prefix())
            .filter(|blob| is_plain_name(blob))
            .ok_or_else(|| {
                AppError::Dependency(format!("Image URL is not owned by this store: {}", url))
            })?;
        Ok(self.container_dir().join(blob))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, name: &str, bytes: &[u8], content_type: &str) -> Result<String, AppError> {
        let blob = blob_name(name);
        let dir = self.container_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| AppError::Dependency(format!("Failed to prepare image container: {}", e)))?;
        tokio::fs::write(dir.join(&blob), bytes)
            .await
            .map_err(|e| AppError::Dependency(format!("Failed to store image: {}", e)))?;

        tracing::debug!(blob = %blob, content_type, size = bytes.len(), "Stored image");
        Ok(format!("{}{}", self.url_prefix(), blob))
    }

    async fn delete(&self, url: &str) -> Result<(), AppError> {
        if url.is_empty() {
            return Ok(());
        }
        let path = self.blob_path(url)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| AppError::Dependency(format!("Failed to delete image {}: {}", url, e)))?;

        tracing::debug!(url, "Deleted image");
        Ok(())
    }
}

/// `<random id>-<original name>`, with path separators stripped from the name.
fn blob_name(name: &str) -> String {
    let file_name = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");
    format!("{}-{}", uuid::Uuid::new_v4().simple(), file_name)
}

fn is_plain_name(blob: &str) -> bool {
    !blob.is_empty() && !blob.contains('/') && !blob.contains('\\') && blob != ".."
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FsObjectStore {
        FsObjectStore::new(dir.path(), "http://localhost:8080/images/", "image-container")
    }

    #[tokio::test]
    async fn test_put_then_delete_blob() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let url = store.put("soup.png", b"png-bytes", "image/png").await.unwrap();
        assert!(url.starts_with("http://localhost:8080/images/image-container/"));
        assert!(url.ends_with("-soup.png"));

        let path = store.blob_path(&url).unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"png-bytes");

        store.delete(&url).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_delete_empty_url_is_noop() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).delete("").await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_rejects_foreign_urls() {
        let dir = TempDir::new().unwrap();
        let err = store(&dir)
            .delete("https://elsewhere.example/image-container/x.png")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "DEPENDENCY_ERROR");
    }

    #[tokio::test]
    async fn test_upload_without_file_is_empty_url() {
        let dir = TempDir::new().unwrap();
        let url = upload_image(&store(&dir), None).await.unwrap();
        assert!(url.is_empty());
    }

    #[test]
    fn test_blob_name_strips_directories() {
        let name = blob_name("../../etc/passwd");
        assert!(name.ends_with("-passwd"));
        assert!(!name.contains('/'));
    }
}
