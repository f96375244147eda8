//! Multipart form uploads.
//!
//! The form is spooled to anonymous temp files first so the file count and
//! total size are known before anything is written to a backend. Files are
//! then created one after another; when one fails, the files already
//! committed by the same request are deleted again.

use bytes::Bytes;
use futures::stream::{StreamExt, TryStreamExt};
use hyper::StatusCode;
use serde::Serialize;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::identifier::driver_key;
use crate::resolve::is_directory;
use crate::storage::{file_stream, ByteStream, CreateOptions, ObjectRecord, StorageBackend};
use crate::{Error, Result};

/// One progress or result event of a streamed upload, sent as a JSON line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UploadEvent {
    Start { files: usize, bytes: u64 },
    Progress { file: String, bytes: u64, total: u64 },
    Complete { file: String, record: ObjectRecord },
    Done { records: Vec<ObjectRecord> },
    Error { message: String, status: u16 },
}

impl UploadEvent {
    pub fn failed(err: &Error, status: StatusCode) -> Self {
        UploadEvent::Error {
            message: err.to_string(),
            status: status.as_u16(),
        }
    }

    /// Newline-terminated JSON.
    pub fn to_line(&self) -> Bytes {
        let mut line = serde_json::to_vec(self).unwrap_or_default();
        line.push(b'\n');
        Bytes::from(line)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadEvent::Done { .. } | UploadEvent::Error { .. })
    }
}

/// A form file held in a temp file until it is uploaded.
#[derive(Debug)]
pub struct SpooledFile {
    pub name: String,
    pub content_type: Option<String>,
    pub size: u64,
    file: tokio::fs::File,
}

/// A spooled file paired with the key it will be written to.
#[derive(Debug)]
pub struct PlannedFile {
    pub key: String,
    pub source: SpooledFile,
}

/// Read every file part of a `multipart/form-data` body into temp files.
///
/// Parts without a file name are skipped.
pub async fn spool_form(body: ByteStream, boundary: &str) -> Result<Vec<SpooledFile>> {
    let mut multipart = multer::Multipart::new(body, boundary);
    let mut files = Vec::new();

    while let Some(mut field) = multipart.next_field().await.map_err(form_error)? {
        let Some(raw_name) = field.file_name() else {
            debug!("Skipping form field {:?} without a file name", field.name());
            continue;
        };
        let name = sanitize_file_name(raw_name)?;
        let content_type = field.content_type().map(|mime| mime.to_string());

        let temp = tokio::task::spawn_blocking(tempfile::tempfile)
            .await
            .map_err(|e| Error::Internal(format!("spooling {} failed: {}", name, e)))??;
        let mut file = tokio::fs::File::from_std(temp);
        let mut size = 0u64;
        while let Some(chunk) = field.chunk().await.map_err(form_error)? {
            size += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.rewind().await?;

        debug!("Spooled form file {} ({} bytes)", name, size);
        files.push(SpooledFile {
            name,
            content_type,
            size,
            file,
        });
    }

    Ok(files)
}

/// Decide the target key of every file, rejecting the request up front when
/// the destination cannot take them.
pub async fn plan(
    backend: &dyn StorageBackend,
    key: &str,
    files: Vec<SpooledFile>,
) -> Result<Vec<PlannedFile>> {
    if files.is_empty() {
        return Err(Error::InvalidArgument(
            "form contains no files".to_string(),
        ));
    }

    let destination = driver_key(key).trim_start_matches('/');
    if !is_directory(backend, destination).await? {
        if files.len() > 1 {
            return Err(Error::InvalidArgument(format!(
                "{} is not a directory, cannot upload {} files into it",
                destination,
                files.len()
            )));
        }
        return Ok(files
            .into_iter()
            .map(|source| PlannedFile {
                key: destination.to_string(),
                source,
            })
            .collect());
    }

    let base = destination.trim_end_matches('/');
    Ok(files
        .into_iter()
        .map(|source| {
            let key = if base.is_empty() {
                source.name.clone()
            } else {
                format!("{}/{}", base, source.name)
            };
            PlannedFile { key, source }
        })
        .collect())
}

/// Upload planned files in order.
///
/// With an event sender, emits `start`, `progress` (at each file start and
/// every `progress_interval` bytes), `complete` per file and a final `done`.
/// A closed receiver cancels the upload. On failure the already committed
/// files are deleted and the error is returned; the caller reports it.
pub async fn run_upload(
    backend: &dyn StorageBackend,
    files: Vec<PlannedFile>,
    progress_interval: u64,
    events: Option<&UnboundedSender<UploadEvent>>,
) -> Result<Vec<ObjectRecord>> {
    let total_bytes = files.iter().map(|f| f.source.size).sum();
    emit(
        events,
        UploadEvent::Start {
            files: files.len(),
            bytes: total_bytes,
        },
    )?;

    let mut committed: Vec<ObjectRecord> = Vec::with_capacity(files.len());
    for planned in files {
        let record = match upload_one(backend, planned, progress_interval, events).await {
            Ok(record) => record,
            Err(e) => return Err(rollback(backend, &committed, e).await),
        };
        committed.push(record.clone());
        let complete = UploadEvent::Complete {
            file: record.key.clone(),
            record,
        };
        if let Err(e) = emit(events, complete) {
            return Err(rollback(backend, &committed, e).await);
        }
    }

    info!("Uploaded {} file(s), {} bytes", committed.len(), total_bytes);
    if let Err(e) = emit(
        events,
        UploadEvent::Done {
            records: committed.clone(),
        },
    ) {
        return Err(rollback(backend, &committed, e).await);
    }
    Ok(committed)
}

async fn upload_one(
    backend: &dyn StorageBackend,
    planned: PlannedFile,
    progress_interval: u64,
    events: Option<&UnboundedSender<UploadEvent>>,
) -> Result<ObjectRecord> {
    let PlannedFile { key, source } = planned;
    emit(
        events,
        UploadEvent::Progress {
            file: key.clone(),
            bytes: 0,
            total: source.size,
        },
    )?;

    let body = match events {
        Some(sender) => with_progress(
            file_stream(source.file, key.clone()),
            sender.clone(),
            key.clone(),
            source.size,
            progress_interval.max(1),
        ),
        None => file_stream(source.file, key.clone()),
    };

    let options = CreateOptions {
        content_type: source.content_type,
        ..Default::default()
    };
    backend.create(&key, body, options).await
}

fn with_progress(
    stream: ByteStream,
    sender: UnboundedSender<UploadEvent>,
    file: String,
    total: u64,
    interval: u64,
) -> ByteStream {
    let mut sent = 0u64;
    let mut reported = 0u64;
    stream
        .and_then(move |chunk| {
            sent += chunk.len() as u64;
            let outcome = if sent - reported >= interval {
                reported = sent;
                sender
                    .send(UploadEvent::Progress {
                        file: file.clone(),
                        bytes: sent,
                        total,
                    })
                    .map(|()| chunk)
                    .map_err(|_| cancelled())
            } else {
                Ok(chunk)
            };
            futures::future::ready(outcome)
        })
        .boxed()
}

fn emit(events: Option<&UnboundedSender<UploadEvent>>, event: UploadEvent) -> Result<()> {
    match events {
        Some(sender) => sender.send(event).map_err(|_| cancelled()),
        None => Ok(()),
    }
}

async fn rollback(backend: &dyn StorageBackend, committed: &[ObjectRecord], cause: Error) -> Error {
    if committed.is_empty() {
        return cause;
    }
    warn!(
        "Upload failed ({}), removing {} committed file(s)",
        cause,
        committed.len()
    );

    let mut cleanup = Vec::new();
    for record in committed.iter().rev() {
        match backend.delete(&record.key).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => cleanup.push(e),
        }
    }
    cause.with_cleanup(cleanup)
}

fn cancelled() -> Error {
    Error::Internal("upload cancelled: progress receiver closed".to_string())
}

fn form_error(err: multer::Error) -> Error {
    Error::InvalidArgument(format!("malformed multipart form: {}", err))
}

/// Last path component of a client-supplied file name.
fn sanitize_file_name(raw: &str) -> Result<String> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if name.is_empty() || name == "." || name == ".." {
        return Err(Error::InvalidArgument(format!(
            "invalid upload file name {:?}",
            raw
        )));
    }
    Ok(name.to_string())
}
