//! Object storage seam used by the job pipelines.

mod memory;
mod minio_client;

pub use memory::MemoryStore;
pub use minio_client::{MinioConfig, MinioStore};

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Bucket/key object storage. Implementations are shared across jobs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<(), StorageError>;

    /// Keys under `prefix`, sorted.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Fetch an object into a local file and return its size in bytes.
    async fn download(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64, StorageError> {
        let data = self.get(bucket, key).await?;
        tokio::fs::write(dest, &data)
            .await
            .map_err(|e| StorageError::Backend(format!("write {}: {e}", dest.display())))?;
        Ok(data.len() as u64)
    }

    /// Store a local file as an object.
    async fn upload(&self, bucket: &str, key: &str, src: &Path) -> Result<(), StorageError> {
        let data = tokio::fs::read(src)
            .await
            .map_err(|e| StorageError::Backend(format!("read {}: {e}", src.display())))?;
        self.put(bucket, key, data).await
    }
}
