use std::sync::Arc;

use bytes::Bytes;
use object_store::memory::InMemory;

use crate::error::EtlResult;
use crate::storage::ObjectStore;
use crate::storage::backend::BackendStore;

/// Object store keeping every object in memory.
#[derive(Debug, Clone)]
pub struct MemoryObjectStore {
    backend: BackendStore,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            backend: BackendStore::new(Arc::new(InMemory::new())),
        }
    }

    pub async fn object_count(&self) -> usize {
        self.backend.list("").await.map_or(0, |paths| paths.len())
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn name() -> &'static str {
        "memory"
    }

    async fn put(&self, path: &str, bytes: Bytes) -> EtlResult<()> {
        self.backend.put(path, bytes).await
    }

    async fn get(&self, path: &str) -> EtlResult<Bytes> {
        self.backend.get(path).await
    }

    async fn list(&self, prefix: &str) -> EtlResult<Vec<String>> {
        self.backend.list(prefix).await
    }

    async fn delete(&self, path: &str) -> EtlResult<()> {
        self.backend.delete(path).await
    }
}
