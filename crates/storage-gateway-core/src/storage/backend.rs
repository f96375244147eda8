//! Storage backend trait definition.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{Error, Result};

/// Owned stream of object bytes. Dropping it releases the backend handle.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Batch size used when a backend does not advertise its own limit.
pub const DEFAULT_DELETE_BATCH: usize = 1000;

/// Default number of entries returned per list page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Storage technology behind a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Filesystem,
    Memory,
    S3,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Filesystem => "filesystem",
            BackendKind::Memory => "memory",
            BackendKind::S3 => "s3",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized metadata about a stored object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    /// Backend-relative key
    pub key: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    pub last_modified: DateTime<Utc>,
    /// Stored content type, if the backend keeps one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Opaque entity tag supplied by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_tag: Option<String>,
    /// User-defined metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub user_metadata: BTreeMap<String, String>,
}

/// Options accompanying a write.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub content_type: Option<String>,
    /// Requested modification time; backends that cannot set it ignore it
    pub modified: Option<DateTime<Utc>>,
    pub user_metadata: BTreeMap<String, String>,
    /// Fail with `Conflict` instead of replacing an existing object
    pub if_not_exists: bool,
}

impl CreateOptions {
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }
}

/// An open object: its record plus the byte stream.
pub struct ObjectReader {
    pub record: ObjectRecord,
    pub stream: ByteStream,
}

impl ObjectReader {
    /// Drain the stream into memory.
    pub async fn bytes(self) -> Result<Bytes> {
        collect_bytes(self.stream).await
    }
}

impl fmt::Debug for ObjectReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectReader")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

/// One page request against a backend.
#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    /// Empty for the whole backend, otherwise ends with `/`
    pub prefix: String,
    /// Only immediate children; nested levels come back as prefix entries
    pub delimiter: bool,
    /// Continue after this key
    pub token: Option<String>,
    /// Upper bound on entries; the backend page size applies when unset
    pub limit: Option<usize>,
}

impl ListRequest {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    pub fn delimited(mut self, delimiter: bool) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn after(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A listed entry: either an object or a synthesized directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ListEntry {
    Object(ObjectRecord),
    Prefix { key: String },
}

impl ListEntry {
    pub fn key(&self) -> &str {
        match self {
            ListEntry::Object(record) => &record.key,
            ListEntry::Prefix { key } => key,
        }
    }
}

/// One page of list results.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ListPage {
    pub entries: Vec<ListEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

/// Trait for storage backends
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Storage technology of this backend
    fn kind(&self) -> BackendKind;

    /// Largest number of keys accepted by one `delete_many` call
    fn max_delete_batch(&self) -> usize {
        DEFAULT_DELETE_BATCH
    }

    /// Write an object from a byte stream, replacing any existing one
    async fn create(&self, key: &str, data: ByteStream, options: CreateOptions)
        -> Result<ObjectRecord>;

    /// Get object metadata
    async fn metadata(&self, key: &str) -> Result<ObjectRecord>;

    /// Open an object for reading
    async fn read(&self, key: &str) -> Result<ObjectReader>;

    /// List one page of entries under a prefix
    async fn list_page(&self, request: &ListRequest) -> Result<ListPage>;

    /// Delete exactly one key
    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete a batch of keys, returning the keys that were removed.
    ///
    /// Keys that are already absent are skipped, any other failure aborts.
    async fn delete_many(&self, keys: &[String]) -> Result<Vec<String>> {
        let mut deleted = Vec::with_capacity(keys.len());
        for key in keys {
            match self.delete(key).await {
                Ok(()) => deleted.push(key.clone()),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(deleted)
    }

    /// Check if a key exists
    async fn exists(&self, key: &str) -> Result<bool> {
        match self.metadata(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Wrap an in-memory buffer as a byte stream.
pub fn bytes_stream(data: impl Into<Bytes>) -> ByteStream {
    let data = data.into();
    if data.is_empty() {
        return stream::empty().boxed();
    }
    stream::once(async move { Ok(data) }).boxed()
}

/// Drain a byte stream into one buffer.
pub async fn collect_bytes(stream: ByteStream) -> Result<Bytes> {
    let buf = stream
        .try_fold(BytesMut::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        })
        .await?;
    Ok(buf.freeze())
}

/// Reject keys that cannot name a single object.
pub(crate) fn validate_object_key(key: &str) -> Result<()> {
    if key.is_empty() || key.ends_with('/') {
        return Err(Error::InvalidArgument(format!(
            "'{}' names a prefix, not an object",
            key
        )));
    }
    if crate::identifier::has_parent_segment(key) {
        return Err(Error::InvalidArgument(format!(
            "'{}' contains a parent directory segment",
            key
        )));
    }
    Ok(())
}

/// Apply continuation token and limit to a sorted entry list.
pub(crate) fn paginate(
    mut entries: Vec<ListEntry>,
    token: Option<&str>,
    limit: usize,
) -> ListPage {
    entries.sort_by(|a, b| a.key().cmp(b.key()));
    if let Some(token) = token {
        entries.retain(|e| e.key() > token);
    }
    let limit = limit.max(1);
    let next_token = if entries.len() > limit {
        entries.truncate(limit);
        entries.last().map(|e| e.key().to_string())
    } else {
        None
    };
    ListPage {
        entries,
        next_token,
    }
}
