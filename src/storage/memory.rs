use super::{ObjectStore, StorageError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// In-process object store keyed by `(bucket, key)`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Vec<u8>>) {
        self.lock()
            .insert((bucket.to_string(), key.to_string()), data.into());
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<(String, String), Vec<u8>>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        self.object(bucket, key)
            .ok_or_else(|| StorageError::NotFound(format!("{bucket}/{key}")))
    }

    async fn put(&self, bucket: &str, key: &str, data: Vec<u8>) -> Result<(), StorageError> {
        self.insert(bucket, key, data);
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .lock()
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        store.put("logs", "b/2.log", b"two".to_vec()).await.unwrap();
        store.put("logs", "a/1.log", b"one".to_vec()).await.unwrap();
        store.put("other", "a/3.log", b"three".to_vec()).await.unwrap();

        assert_eq!(store.get("logs", "a/1.log").await.unwrap(), b"one");
        assert_eq!(store.list("logs", "").await.unwrap(), vec!["a/1.log", "b/2.log"]);
        assert_eq!(store.list("logs", "a/").await.unwrap(), vec!["a/1.log"]);
        assert!(matches!(
            store.get("logs", "missing").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_file_transfer_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::new();
        store.insert("b", "k", "payload");

        let dest = dir.path().join("k.bin");
        assert_eq!(store.download("b", "k", &dest).await.unwrap(), 7);
        store.upload("b", "copy", &dest).await.unwrap();
        assert_eq!(store.object("b", "copy").unwrap(), b"payload");
    }
}
