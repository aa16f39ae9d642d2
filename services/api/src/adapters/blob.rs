//! services/api/src/adapters/blob.rs
//!
//! A `BlobStore` backed by a local directory. The service serves the same
//! directory under `/media/files`, so the returned URI is directly retrievable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lesson_hub_core::ports::{BlobStore, PortError, PortResult};
use std::path::PathBuf;
use tracing::info;

/// `<unix-millis>-<original name>` with path separators removed.
pub fn media_file_name(now: DateTime<Utc>, original: &str) -> String {
    let cleaned: String = original
        .chars()
        .filter(|c| !matches!(c, '/' | '\\'))
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    let cleaned = if cleaned.is_empty() { "upload" } else { cleaned };
    format!("{}-{}", now.timestamp_millis(), cleaned)
}

pub struct FsBlobStore {
    root: PathBuf,
    public_base_url: String,
}

impl FsBlobStore {
    pub fn new(root: PathBuf, public_base_url: &str) -> Self {
        Self {
            root,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, file_name: &str, bytes: &[u8]) -> PortResult<String> {
        if file_name.is_empty() || file_name.contains(['/', '\\']) || file_name.starts_with('.') {
            return Err(PortError::Rejected(format!("Invalid file name: {}", file_name)));
        }
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        tokio::fs::write(self.root.join(file_name), bytes)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        info!("Stored {} ({} bytes)", file_name, bytes.len());
        Ok(format!("{}/media/files/{}", self.public_base_url, file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_media_file_name_strips_separators() {
        let now = Utc.timestamp_millis_opt(1_767_225_600_000).unwrap();
        assert_eq!(media_file_name(now, "../../etc/passwd"), "1767225600000-etcpasswd");
        assert_eq!(media_file_name(now, "pizarra.jpg"), "1767225600000-pizarra.jpg");
        assert_eq!(media_file_name(now, ""), "1767225600000-upload");
    }

    #[tokio::test]
    async fn test_upload_writes_file_and_returns_public_uri() {
        let root = std::env::temp_dir().join(format!("lesson-hub-blobs-{}", uuid::Uuid::new_v4()));
        let store = FsBlobStore::new(root.clone(), "https://hub.example/");
        let uri = store.upload("1-board.jpg", b"jpeg").await.unwrap();
        assert_eq!(uri, "https://hub.example/media/files/1-board.jpg");
        assert_eq!(std::fs::read(root.join("1-board.jpg")).unwrap(), b"jpeg");
        assert!(matches!(
            store.upload("../escape", b"x").await,
            Err(PortError::Rejected(_))
        ));
        let _ = std::fs::remove_dir_all(root);
    }
}
