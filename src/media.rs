//! Report image bucket
//!
//! Images live on disk under `<root>/<bucket>/reports/<uuid>.<ext>` and are
//! served read-only at `/media/<bucket>/...`.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::MediaConfig;

const OBJECT_PREFIX: &str = "reports";
const DEFAULT_EXTENSION: &str = "jpg";

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("uploaded file is empty")]
    Empty,
    #[error("file is larger than the {0} byte limit")]
    TooLarge(usize),
    #[error("only image uploads are accepted (got '{0}')")]
    NotImage(String),
    #[error(transparent)]
    Storage(#[from] std::io::Error),
}

/// Where an uploaded image ended up
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StoredImage {
    pub path: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    bucket: String,
    max_file_size: usize,
    public_url: String,
}

impl MediaStore {
    pub fn new(config: &MediaConfig, public_url: &str) -> Self {
        Self {
            root: config.root.clone(),
            bucket: config.bucket.clone(),
            max_file_size: config.max_file_size,
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    /// Directory served under `/media`
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self) -> PathBuf {
        self.root.join(&self.bucket)
    }

    /// Create the bucket directory if it does not exist yet
    pub async fn ensure_bucket(&self) -> Result<(), MediaError> {
        let dir = self.bucket_dir().join(OBJECT_PREFIX);
        if fs::try_exists(&dir).await? {
            return Ok(());
        }
        fs::create_dir_all(&dir).await?;
        info!(
            "Created media bucket '{}' at {} (limit {} bytes)",
            self.bucket,
            dir.display(),
            self.max_file_size
        );
        Ok(())
    }

    pub fn check_upload(&self, content_type: &str, len: usize) -> Result<(), MediaError> {
        if len == 0 {
            return Err(MediaError::Empty);
        }
        if len > self.max_file_size {
            return Err(MediaError::TooLarge(self.max_file_size));
        }
        if !content_type.trim().to_ascii_lowercase().starts_with("image/") {
            return Err(MediaError::NotImage(content_type.to_string()));
        }
        Ok(())
    }

    /// Store an image under a fresh name. Existing objects are never replaced.
    pub async fn upload_image(
        &self,
        filename: Option<&str>,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<StoredImage, MediaError> {
        self.check_upload(content_type, bytes.len())?;
        self.ensure_bucket().await?;

        let path = format!(
            "{}/{}.{}",
            OBJECT_PREFIX,
            Uuid::new_v4(),
            file_extension(filename)
        );

        let target = self.bucket_dir().join(&path);
        let file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await?;
        write_or_discard(file, &target, bytes).await?;

        info!("Stored image {} ({} bytes)", path, bytes.len());

        Ok(StoredImage {
            url: self.public_url_for(&path),
            path,
        })
    }

    pub fn public_url_for(&self, path: &str) -> String {
        format!("{}/media/{}/{}", self.public_url, self.bucket, path)
    }
}

/// Write the whole object; a partial object is removed again on failure
async fn write_or_discard<W: AsyncWrite + Unpin>(
    mut out: W,
    target: &Path,
    bytes: &[u8],
) -> Result<(), MediaError> {
    let written: std::io::Result<()> = async {
        out.write_all(bytes).await?;
        out.flush().await
    }
    .await;
    drop(out);

    if let Err(e) = written {
        if let Err(cleanup) = fs::remove_file(target).await {
            warn!(
                "Failed to remove partial upload {}: {}",
                target.display(),
                cleanup
            );
        }
        return Err(e.into());
    }
    Ok(())
}

/// Extension of the original file name, lowercased, or "jpg"
fn file_extension(filename: Option<&str>) -> String {
    filename
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// Accepts nothing, like a full disk
    struct FullDisk;

    impl AsyncWrite for FullDisk {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "no space left on device",
            )))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn store(root: &Path) -> MediaStore {
        let config = MediaConfig {
            root: root.to_path_buf(),
            bucket: "report-images".to_string(),
            max_file_size: 16,
        };
        MediaStore::new(&config, "http://localhost:8080/")
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension(Some("photo.PNG")), "png");
        assert_eq!(file_extension(Some("archive.tar.gz")), "gz");
        assert_eq!(file_extension(Some("noext")), "jpg");
        assert_eq!(file_extension(None), "jpg");
    }

    #[test]
    fn test_check_upload() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert!(matches!(store.check_upload("image/png", 0), Err(MediaError::Empty)));
        assert!(matches!(
            store.check_upload("image/png", 17),
            Err(MediaError::TooLarge(16))
        ));
        assert!(matches!(
            store.check_upload("application/pdf", 4),
            Err(MediaError::NotImage(_))
        ));
        assert!(store.check_upload("image/jpeg", 16).is_ok());
    }

    #[tokio::test]
    async fn test_upload_writes_under_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let stored = store
            .upload_image(Some("dump.png"), "image/png", b"\x89PNG....")
            .await
            .unwrap();

        assert!(stored.path.starts_with("reports/"));
        assert!(stored.path.ends_with(".png"));
        assert_eq!(
            stored.url,
            format!("http://localhost:8080/media/report-images/{}", stored.path)
        );

        let on_disk = std::fs::read(dir.path().join("report-images").join(&stored.path)).unwrap();
        assert_eq!(on_disk, b"\x89PNG....");
    }

    #[tokio::test]
    async fn test_uploads_get_distinct_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let a = store.upload_image(None, "image/jpeg", b"aaaa").await.unwrap();
        let b = store.upload_image(None, "image/jpeg", b"bbbb").await.unwrap();
        assert_ne!(a.path, b.path);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_object() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("half.png");
        std::fs::write(&target, b"\x89P").unwrap();

        let result = write_or_discard(FullDisk, &target, b"\x89PNG....").await;
        assert!(matches!(result, Err(MediaError::Storage(_))));
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn test_ensure_bucket_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.ensure_bucket().await.unwrap();
        store.ensure_bucket().await.unwrap();
        assert!(dir.path().join("report-images/reports").is_dir());
    }
}
