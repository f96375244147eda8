//! Multipart upload pipeline.
//!
//! Splits an incoming byte stream into fixed-size parts and uploads them in
//! order through an [`UploadSession`]. The session is either completed into a
//! single object or aborted; a session is never left open. If the pipeline
//! future is dropped mid-upload (request cancelled), the abort is spawned on
//! the runtime from `Drop`.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use object_store::{MultipartUpload, PutPayload};
use tracing::{debug, warn};

use crate::storage::ByteStream;
use crate::{Error, Result};

/// Smallest part size S3-compatible stores accept (5 MiB).
pub const MIN_S3_PART_SIZE: usize = 5 * 1024 * 1024;

/// Default part size (8 MiB).
pub const DEFAULT_PART_SIZE: usize = 8 * 1024 * 1024;

/// One uploaded part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartReceipt {
    /// 1-based sequence number
    pub sequence: usize,
    pub e_tag: Option<String>,
    pub size: u64,
}

/// Result of a completed upload.
#[derive(Debug, Clone)]
pub struct UploadSummary {
    pub parts: Vec<PartReceipt>,
    pub size: u64,
    pub e_tag: Option<String>,
}

/// An open multipart session on a backend.
#[async_trait]
pub trait UploadSession: Send + 'static {
    /// Upload one numbered part, returning its entity tag if the store reports one
    async fn upload_part(&mut self, sequence: usize, data: Bytes) -> Result<Option<String>>;

    /// Commit the ordered part list into one object
    async fn complete(&mut self, parts: &[PartReceipt]) -> Result<Option<String>>;

    /// Discard every uploaded part
    async fn abort(&mut self) -> Result<()>;
}

/// Aborts the session on drop unless it was disarmed.
struct AbortGuard<S: UploadSession> {
    session: Option<S>,
    label: String,
}

impl<S: UploadSession> AbortGuard<S> {
    fn session(&mut self) -> Result<&mut S> {
        self.session
            .as_mut()
            .ok_or_else(|| Error::Internal(format!("upload session {} already closed", self.label)))
    }

    /// Abort now, joining any abort failure with `cause`.
    async fn abort_with(mut self, cause: Error) -> Error {
        let Some(mut session) = self.session.take() else {
            return cause;
        };
        match session.abort().await {
            Ok(()) => {
                debug!("Aborted multipart upload {}", self.label);
                cause
            }
            Err(abort_err) => {
                warn!("Failed to abort multipart upload {}: {}", self.label, abort_err);
                cause.with_cleanup(vec![abort_err])
            }
        }
    }

    fn disarm(mut self) {
        self.session = None;
    }
}

impl<S: UploadSession> Drop for AbortGuard<S> {
    fn drop(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        // Best effort: we cannot await here, so hand the abort to the runtime.
        let label = std::mem::take(&mut self.label);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = session.abort().await {
                        warn!("Failed to abort cancelled multipart upload {}: {}", label, e);
                    } else {
                        debug!("Aborted cancelled multipart upload {}", label);
                    }
                });
            }
            Err(_) => warn!("No runtime to abort cancelled multipart upload {}", label),
        }
    }
}

/// Fixed-size chunker over a byte stream.
pub struct PartChunker {
    stream: ByteStream,
    buf: BytesMut,
    part_size: usize,
    done: bool,
}

impl PartChunker {
    pub fn new(stream: ByteStream, part_size: usize) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
            part_size: part_size.max(1),
            done: false,
        }
    }

    /// Next full part, or the final partial part at end of stream.
    pub async fn next_part(&mut self) -> Result<Option<Bytes>> {
        while !self.done && self.buf.len() < self.part_size {
            match self.stream.next().await {
                Some(chunk) => self.buf.extend_from_slice(&chunk?),
                None => self.done = true,
            }
        }
        if self.buf.is_empty() {
            return Ok(None);
        }
        let take = self.buf.len().min(self.part_size);
        Ok(Some(self.buf.split_to(take).freeze()))
    }

    /// Whether the stream has been fully consumed and buffered.
    pub fn is_exhausted(&self) -> bool {
        self.done && self.buf.is_empty()
    }
}

/// Upload `first` followed by the rest of `chunker` as numbered parts.
///
/// On any failure the session is aborted before the error is returned.
pub async fn upload_parts<S: UploadSession>(
    session: S,
    label: &str,
    first: Bytes,
    mut chunker: PartChunker,
) -> Result<UploadSummary> {
    let mut guard = AbortGuard {
        session: Some(session),
        label: label.to_string(),
    };
    let mut parts: Vec<PartReceipt> = Vec::new();
    let mut total = 0u64;
    let mut next = Some(first);

    loop {
        let data = match next.take() {
            Some(data) => data,
            None => match chunker.next_part().await {
                Ok(Some(data)) => data,
                Ok(None) => break,
                Err(e) => return Err(guard.abort_with(e).await),
            },
        };

        let sequence = parts.len() + 1;
        let size = data.len() as u64;
        debug!("Uploading part {} ({} bytes) of {}", sequence, size, label);
        match guard.session()?.upload_part(sequence, data).await {
            Ok(e_tag) => {
                total += size;
                parts.push(PartReceipt {
                    sequence,
                    e_tag,
                    size,
                });
            }
            Err(e) => return Err(guard.abort_with(e).await),
        }
    }

    let e_tag = match guard.session()?.complete(&parts).await {
        Ok(e_tag) => e_tag,
        Err(e) => return Err(guard.abort_with(e).await),
    };
    guard.disarm();

    debug!("Completed multipart upload {} with {} parts", label, parts.len());
    Ok(UploadSummary {
        parts,
        size: total,
        e_tag,
    })
}

/// [`UploadSession`] over an `object_store` multipart upload.
pub struct ObjectStoreSession {
    upload: Box<dyn MultipartUpload>,
    key: String,
}

impl ObjectStoreSession {
    pub fn new(upload: Box<dyn MultipartUpload>, key: impl Into<String>) -> Self {
        Self {
            upload,
            key: key.into(),
        }
    }
}

#[async_trait]
impl UploadSession for ObjectStoreSession {
    async fn upload_part(&mut self, _sequence: usize, data: Bytes) -> Result<Option<String>> {
        self.upload
            .put_part(PutPayload::from_bytes(data))
            .await
            .map_err(|e| crate::error::map_object_store_error(&self.key, e))?;
        Ok(None)
    }

    async fn complete(&mut self, _parts: &[PartReceipt]) -> Result<Option<String>> {
        let result = self
            .upload
            .complete()
            .await
            .map_err(|e| crate::error::map_object_store_error(&self.key, e))?;
        Ok(result.e_tag)
    }

    async fn abort(&mut self) -> Result<()> {
        self.upload
            .abort()
            .await
            .map_err(|e| crate::error::map_object_store_error(&self.key, e))
    }
}
