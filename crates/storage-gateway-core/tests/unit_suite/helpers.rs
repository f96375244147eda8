//! Test helper utilities.
//!
//! Seeds backends with known layouts, drives the HTTP handler without a
//! socket, and wraps the memory backend to misbehave in controlled ways.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::HeaderMap;
use hyper::{Request, StatusCode};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use storage_gateway_core::config::ServerConfig;
use storage_gateway_core::http::handle_request;
use storage_gateway_core::storage::{bytes_stream, MemoryBackend};
use storage_gateway_core::{
    BackendKind, ByteStream, CreateOptions, Error, GatewayState, Identifier, ListEntry,
    ListPage, ListRequest, ObjectReader, ObjectRecord, Registry, Result, StorageBackend,
};

/// Contents of the 11-byte `a.txt` in [`scenario_backend`].
pub const A_TXT: &str = "hello world";

/// Write `content` at `key`.
pub async fn put(backend: &dyn StorageBackend, key: &str, content: &str) -> ObjectRecord {
    backend
        .create(key, bytes_stream(content.to_string()), CreateOptions::default())
        .await
        .expect("seed write failed")
}

/// Memory backend holding `a.txt`, `dir/b.txt` and `dir/c.txt`.
pub async fn scenario_backend() -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    put(backend.as_ref(), "a.txt", A_TXT).await;
    put(backend.as_ref(), "dir/b.txt", "bravo").await;
    put(backend.as_ref(), "dir/c.txt", "charlie").await;
    backend
}

/// Sorted keys of everything stored in `backend`.
pub async fn all_keys(backend: &dyn StorageBackend) -> Vec<String> {
    let mut keys: Vec<String> = storage_gateway_core::bulk::list_all(backend, "", true)
        .await
        .expect("list failed")
        .iter()
        .map(|e| e.key().to_string())
        .collect();
    keys.sort();
    keys
}

/// Gateway state serving `backend` at `mem://test/`.
pub fn gateway(backend: Arc<dyn StorageBackend>) -> Arc<GatewayState> {
    let mut registry = Registry::new();
    registry
        .register("test", Identifier::resolve("mem://test/").unwrap(), backend)
        .expect("register failed");
    let server = ServerConfig {
        progress_interval: 4,
        ..Default::default()
    };
    Arc::new(GatewayState::new(Arc::new(registry), &server))
}

/// Collected response.
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Reply {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("response is not JSON")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Send `request` through the handler and collect the whole response.
pub async fn send(state: &Arc<GatewayState>, request: Request<Full<Bytes>>) -> Reply {
    let response = handle_request(request, Arc::clone(state)).await;
    let (parts, body) = response.into_parts();
    let body = body.collect().await.expect("body failed").to_bytes();
    Reply {
        status: parts.status,
        headers: parts.headers,
        body,
    }
}

/// Request with an empty body.
pub fn request(method: &str, uri: &str) -> hyper::http::request::Builder {
    Request::builder().method(method).uri(uri)
}

pub fn empty_body() -> Full<Bytes> {
    Full::new(Bytes::new())
}

/// `multipart/form-data` body with one part per `(file name, content)`.
pub fn form(boundary: &str, files: &[(&str, &str)]) -> Full<Bytes> {
    let mut body = String::new();
    for (name, content) in files {
        body.push_str(&format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\r\n{}\r\n",
            boundary, name, content
        ));
    }
    body.push_str(&format!("--{}--\r\n", boundary));
    Full::new(Bytes::from(body))
}

/// Memory backend that takes at most two keys per `delete_many` and records
/// every batch it receives.
#[derive(Default)]
pub struct SmallBatches {
    pub inner: MemoryBackend,
    pub batches: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl StorageBackend for SmallBatches {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn max_delete_batch(&self) -> usize {
        2
    }

    async fn create(
        &self,
        key: &str,
        data: ByteStream,
        options: CreateOptions,
    ) -> Result<ObjectRecord> {
        self.inner.create(key, data, options).await
    }

    async fn metadata(&self, key: &str) -> Result<ObjectRecord> {
        self.inner.metadata(key).await
    }

    async fn read(&self, key: &str) -> Result<ObjectReader> {
        self.inner.read(key).await
    }

    async fn list_page(&self, request: &ListRequest) -> Result<ListPage> {
        self.inner.list_page(request).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<Vec<String>> {
        self.batches.lock().push(keys.to_vec());
        self.inner.delete_many(keys).await
    }
}

/// Memory backend whose listings lag behind its writes and deletes:
/// `late` keys stay invisible until the first batch delete, and deleted
/// records are listed once more afterwards. Batch deletes acknowledge every
/// key, present or not.
#[derive(Default)]
pub struct LaggingListing {
    pub inner: MemoryBackend,
    pub late: Mutex<HashSet<String>>,
    stale: Mutex<Vec<ObjectRecord>>,
}

#[async_trait]
impl StorageBackend for LaggingListing {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    async fn create(
        &self,
        key: &str,
        data: ByteStream,
        options: CreateOptions,
    ) -> Result<ObjectRecord> {
        self.inner.create(key, data, options).await
    }

    async fn metadata(&self, key: &str) -> Result<ObjectRecord> {
        self.inner.metadata(key).await
    }

    async fn read(&self, key: &str) -> Result<ObjectReader> {
        self.inner.read(key).await
    }

    async fn list_page(&self, request: &ListRequest) -> Result<ListPage> {
        let mut page = self.inner.list_page(request).await?;
        let late = self.late.lock().clone();
        page.entries.retain(|e| !late.contains(e.key()));
        let stale: Vec<ObjectRecord> = std::mem::take(&mut *self.stale.lock());
        page.entries.extend(
            stale
                .into_iter()
                .filter(|r| r.key.starts_with(request.prefix.as_str()))
                .map(ListEntry::Object),
        );
        Ok(page)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<Vec<String>> {
        for key in keys {
            if let Ok(record) = self.inner.metadata(key).await {
                self.stale.lock().push(record);
            }
        }
        self.inner.delete_many(keys).await?;
        self.late.lock().clear();
        Ok(keys.to_vec())
    }
}

/// Memory backend that refuses to write keys ending in `refused`.
#[derive(Default)]
pub struct RefusingWrites {
    pub inner: MemoryBackend,
    pub refused: String,
}

#[async_trait]
impl StorageBackend for RefusingWrites {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    async fn create(
        &self,
        key: &str,
        data: ByteStream,
        options: CreateOptions,
    ) -> Result<ObjectRecord> {
        if key.ends_with(self.refused.as_str()) {
            return Err(Error::PermissionDenied(key.to_string()));
        }
        self.inner.create(key, data, options).await
    }

    async fn metadata(&self, key: &str) -> Result<ObjectRecord> {
        self.inner.metadata(key).await
    }

    async fn read(&self, key: &str) -> Result<ObjectReader> {
        self.inner.read(key).await
    }

    async fn list_page(&self, request: &ListRequest) -> Result<ListPage> {
        self.inner.list_page(request).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }
}
