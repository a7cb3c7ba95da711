//! In-memory object storage
//!
//! Keeps objects in a process-local map. Used by the test suites.

use crate::{ObjectHead, ObjectStorage, PutOptions, StorageError, StorageResult};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// One stored object with the headers it was uploaded with
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Object storage backed by a shared in-memory map.
///
/// Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStorage {
    objects: Arc<RwLock<BTreeMap<String, StoredObject>>>,
}

impl MemoryObjectStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw bytes without headers
    pub async fn insert(&self, key: &str, data: impl Into<Vec<u8>>) {
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                data: data.into(),
                ..StoredObject::default()
            },
        );
    }

    /// Snapshot of one object
    pub async fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().await.get(key).cloned()
    }

    /// All keys, sorted
    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn get_object(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.objects.read().await.get(key).map(|o| o.data.clone()))
    }

    async fn put_object(
        &self,
        key: &str,
        data: Vec<u8>,
        options: &PutOptions,
    ) -> StorageResult<String> {
        debug!(key, bytes = data.len(), "put_object (memory)");
        self.objects.write().await.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: options.content_type.clone(),
                cache_control: options.cache_control.clone(),
                metadata: options.metadata.clone(),
            },
        );
        Ok(key.to_string())
    }

    async fn put_object_from_path(
        &self,
        key: &str,
        path: &Path,
        options: &PutOptions,
    ) -> StorageResult<String> {
        let data = tokio::fs::read(path).await?;
        self.put_object(key, data, options).await
    }

    async fn download_to_path(&self, key: &str, path: &Path) -> StorageResult<()> {
        let data = self
            .get_object(key)
            .await?
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    async fn head_object(&self, key: &str) -> StorageResult<Option<ObjectHead>> {
        Ok(self.objects.read().await.get(key).map(|o| ObjectHead {
            size: o.data.len() as u64,
            content_type: o.content_type.clone(),
            metadata: o.metadata.clone(),
        }))
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        // S3 semantics: deleting a missing key succeeds
        self.objects.write().await.remove(key);
        Ok(())
    }
}
