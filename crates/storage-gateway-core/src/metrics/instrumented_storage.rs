//! Instrumented storage backend decorator.
//!
//! Wraps any `StorageBackend` and records latency, bytes transferred and
//! errors for every operation.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Instant;

use super::labels::StorageOperation;
use super::registry::GatewayMetrics;
use crate::storage::{
    BackendKind, ByteStream, CreateOptions, ListPage, ListRequest, ObjectReader, ObjectRecord,
    StorageBackend,
};
use crate::Result;

/// A storage backend wrapper that records metrics for all operations.
///
/// ```rust,ignore
/// use storage_gateway_core::metrics::{GatewayMetrics, InstrumentedBackend};
/// use storage_gateway_core::storage::MemoryBackend;
///
/// let metrics = Arc::new(GatewayMetrics::new());
/// let backend = InstrumentedBackend::new(Arc::new(MemoryBackend::new()), "scratch", metrics);
/// ```
pub struct InstrumentedBackend {
    /// The wrapped storage backend.
    inner: Arc<dyn StorageBackend>,

    /// Registered backend name used as the metric label.
    backend_name: String,

    metrics: Arc<GatewayMetrics>,
}

impl InstrumentedBackend {
    pub fn new(
        inner: Arc<dyn StorageBackend>,
        backend_name: impl Into<String>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            inner,
            backend_name: backend_name.into(),
            metrics,
        }
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    /// Get the inner storage backend.
    pub fn inner(&self) -> &Arc<dyn StorageBackend> {
        &self.inner
    }

    fn observe<T>(&self, operation: StorageOperation, start: Instant, result: &Result<T>) {
        self.metrics.record_storage_latency(
            &self.backend_name,
            operation,
            start.elapsed().as_secs_f64(),
        );
        if let Err(e) = result {
            // Absent keys are routine during resolution, not faults.
            if !e.is_not_found() {
                self.metrics.inc_storage_error(&self.backend_name, e.kind());
            }
        }
    }
}

#[async_trait]
impl StorageBackend for InstrumentedBackend {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn max_delete_batch(&self) -> usize {
        self.inner.max_delete_batch()
    }

    async fn create(
        &self,
        key: &str,
        data: ByteStream,
        options: CreateOptions,
    ) -> Result<ObjectRecord> {
        let start = Instant::now();
        let result = self.inner.create(key, data, options).await;
        self.observe(StorageOperation::Create, start, &result);
        if let Ok(record) = &result {
            self.metrics
                .inc_storage_write_bytes(&self.backend_name, record.size);
        }
        result
    }

    async fn metadata(&self, key: &str) -> Result<ObjectRecord> {
        let start = Instant::now();
        let result = self.inner.metadata(key).await;
        self.observe(StorageOperation::Metadata, start, &result);
        result
    }

    async fn read(&self, key: &str) -> Result<ObjectReader> {
        let start = Instant::now();
        let result = self.inner.read(key).await;
        self.observe(StorageOperation::Read, start, &result);

        let reader = result?;
        let metrics = self.metrics.clone();
        let backend_name = self.backend_name.clone();
        let stream = reader
            .stream
            .inspect(move |chunk| {
                if let Ok(chunk) = chunk {
                    metrics.inc_storage_read_bytes(&backend_name, chunk.len() as u64);
                }
            })
            .boxed();
        Ok(ObjectReader {
            record: reader.record,
            stream,
        })
    }

    async fn list_page(&self, request: &ListRequest) -> Result<ListPage> {
        let start = Instant::now();
        let result = self.inner.list_page(request).await;
        self.observe(StorageOperation::List, start, &result);
        result
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let start = Instant::now();
        let result = self.inner.delete(key).await;
        self.observe(StorageOperation::Delete, start, &result);
        if result.is_ok() {
            self.metrics.inc_objects_deleted(&self.backend_name, 1);
        }
        result
    }

    async fn delete_many(&self, keys: &[String]) -> Result<Vec<String>> {
        let start = Instant::now();
        let result = self.inner.delete_many(keys).await;
        self.observe(StorageOperation::DeleteMany, start, &result);
        if let Ok(deleted) = &result {
            self.metrics
                .inc_objects_deleted(&self.backend_name, deleted.len() as u64);
        }
        result
    }
}
