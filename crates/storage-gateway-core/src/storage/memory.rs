//! In-memory storage backend.

use async_trait::async_trait;
use object_store::memory::InMemory;
use std::sync::Arc;

use super::flat::FlatStore;
use super::{
    BackendKind, ByteStream, CreateOptions, ListPage, ListRequest, ObjectReader, ObjectRecord,
    StorageBackend, DEFAULT_PAGE_SIZE,
};
use crate::multipart::DEFAULT_PART_SIZE;
use crate::Result;

/// In-memory storage backend using object_store
///
/// Data lives only as long as the backend. Behaves like a flat object store:
/// there are no directories, only common key prefixes.
pub struct MemoryBackend {
    flat: FlatStore,
}

impl MemoryBackend {
    /// Create a new in-memory storage backend
    pub fn new() -> Self {
        Self::with_part_size(DEFAULT_PART_SIZE)
    }

    /// Create a backend that switches to multipart uploads above `part_size` bytes
    pub fn with_part_size(part_size: usize) -> Self {
        Self {
            flat: FlatStore::new(
                Arc::new(InMemory::new()),
                BackendKind::Memory,
                None,
                part_size.max(1),
                DEFAULT_PAGE_SIZE,
            ),
        }
    }

    pub fn part_size(&self) -> usize {
        self.flat.part_size()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        self.flat.kind()
    }

    async fn create(
        &self,
        key: &str,
        data: ByteStream,
        options: CreateOptions,
    ) -> Result<ObjectRecord> {
        self.flat.create(key, data, options).await
    }

    async fn metadata(&self, key: &str) -> Result<ObjectRecord> {
        self.flat.metadata(key).await
    }

    async fn read(&self, key: &str) -> Result<ObjectReader> {
        self.flat.read(key).await
    }

    async fn list_page(&self, request: &ListRequest) -> Result<ListPage> {
        self.flat.list_page(request).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.flat.delete(key).await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<Vec<String>> {
        self.flat.delete_many(keys).await
    }
}
