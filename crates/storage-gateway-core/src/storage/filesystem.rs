//! Filesystem storage backend implementation.
//!
//! Objects are regular files under `base_path`. Content type, user metadata
//! and an explicit modification time live in JSON sidecars under the
//! reserved `.gateway-meta/` directory, which is never listed.

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use super::backend::{paginate, validate_object_key};
use super::{
    BackendKind, ByteStream, CreateOptions, ListEntry, ListPage, ListRequest, ObjectReader,
    ObjectRecord, StorageBackend, DEFAULT_PAGE_SIZE,
};
use crate::error::map_io_error;
use crate::{Error, Result};

/// Reserved top-level directory holding metadata sidecars.
pub const META_DIR: &str = ".gateway-meta";

const READ_CHUNK: usize = 64 * 1024;

/// File name prefix of in-flight writes inside [`META_DIR`].
const STAGING_PREFIX: &str = ".staging-";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Sidecar {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    user_metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    modified: Option<DateTime<Utc>>,
}

impl Sidecar {
    fn from_options(options: &CreateOptions) -> Option<Self> {
        if options.content_type.is_none()
            && options.user_metadata.is_empty()
            && options.modified.is_none()
        {
            return None;
        }
        Some(Self {
            content_type: options.content_type.clone(),
            user_metadata: options.user_metadata.clone(),
            modified: options.modified,
        })
    }
}

/// Filesystem-based storage backend
#[derive(Debug, Clone)]
pub struct FilesystemBackend {
    base_path: PathBuf,
    page_size: usize,
}

impl FilesystemBackend {
    /// Create a new filesystem backend with the given base path
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Convert a storage key to a filesystem path
    fn key_to_path(&self, key: &str) -> Result<PathBuf> {
        let normalized = key.trim_matches('/');
        if crate::identifier::has_parent_segment(normalized) {
            return Err(Error::InvalidArgument(format!(
                "'{}' contains a parent directory segment",
                key
            )));
        }
        if normalized.split('/').next() == Some(META_DIR) {
            return Err(Error::InvalidArgument(format!(
                "'{}' is inside the reserved {} directory",
                key, META_DIR
            )));
        }
        Ok(self.base_path.join(normalized))
    }

    fn sidecar_path(&self, key: &str) -> PathBuf {
        self.base_path
            .join(META_DIR)
            .join(format!("{}.json", key.trim_matches('/')))
    }

    async fn read_sidecar(&self, key: &str) -> Sidecar {
        let path = self.sidecar_path(key);
        match fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
                warn!("Ignoring unreadable metadata sidecar {}: {}", path.display(), e);
                Sidecar::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Sidecar::default(),
            Err(e) => {
                warn!("Failed to read metadata sidecar {}: {}", path.display(), e);
                Sidecar::default()
            }
        }
    }

    async fn write_sidecar(&self, key: &str, sidecar: Option<Sidecar>) -> Result<()> {
        let path = self.sidecar_path(key);
        let Some(sidecar) = sidecar else {
            return remove_if_present(&path, key).await;
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io_error(key, e))?;
        }
        let json = serde_json::to_vec(&sidecar)?;
        fs::write(&path, json).await.map_err(|e| map_io_error(key, e))
    }

    async fn record_for(&self, key: &str, path: &Path) -> Result<ObjectRecord> {
        let metadata = fs::metadata(path).await.map_err(|e| map_io_error(key, e))?;
        if metadata.is_dir() {
            return Err(Error::NotFound(key.to_string()));
        }

        let mtime = metadata.modified().unwrap_or(UNIX_EPOCH);
        let mtime_nanos = mtime
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let sidecar = self.read_sidecar(key).await;

        Ok(ObjectRecord {
            key: key.to_string(),
            size: metadata.len(),
            last_modified: sidecar
                .modified
                .unwrap_or_else(|| DateTime::<Utc>::from(mtime)),
            content_type: sidecar.content_type,
            e_tag: Some(format!("{:x}-{:x}", mtime_nanos, metadata.len())),
            user_metadata: sidecar.user_metadata,
        })
    }

    /// Stream `data` into a staging file under [`META_DIR`] and rename it
    /// onto `path` once complete. Readers never observe a partial object and
    /// a failed overwrite leaves the previous object in place.
    async fn write_file(
        &self,
        key: &str,
        path: &Path,
        mut data: ByteStream,
        create_new: bool,
    ) -> Result<()> {
        if create_new && fs::try_exists(path).await.map_err(|e| map_io_error(key, e))? {
            return Err(Error::Conflict(format!("{} already exists", key)));
        }

        let staging_dir = self.base_path.join(META_DIR);
        fs::create_dir_all(&staging_dir)
            .await
            .map_err(|e| map_io_error(key, e))?;
        let staged = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(STAGING_PREFIX)
                .tempfile_in(&staging_dir)
        })
        .await
        .map_err(|e| Error::Internal(format!("staging {} failed: {}", key, e)))?
        .map_err(|e| map_io_error(key, e))?;
        let (file, staged_path) = staged.into_parts();
        let mut file = fs::File::from_std(file);

        let mut written = Ok(());
        while let Some(chunk) = data.next().await {
            let result = match chunk {
                Ok(chunk) => file
                    .write_all(&chunk)
                    .await
                    .map_err(|e| map_io_error(key, e)),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                written = Err(e);
                break;
            }
        }
        if written.is_ok() {
            written = file.flush().await.map_err(|e| map_io_error(key, e));
        }
        drop(file);
        // Dropping the staged path removes the staging file
        written?;

        let target = path.to_path_buf();
        let persisted = tokio::task::spawn_blocking(move || {
            if create_new {
                staged_path.persist_noclobber(&target)
            } else {
                staged_path.persist(&target)
            }
        })
        .await
        .map_err(|e| Error::Internal(format!("committing {} failed: {}", key, e)))?;
        persisted.map_err(|e| map_io_error(key, e.error))
    }

    /// Remove empty directories from `dir` upward, stopping at `stop`.
    async fn prune_empty_dirs(&self, start: Option<&Path>, stop: &Path) {
        let mut dir = start;
        while let Some(d) = dir {
            if d == stop || !d.starts_with(stop) {
                break;
            }
            if fs::remove_dir(d).await.is_err() {
                break;
            }
            debug!("Pruned empty directory {}", d.display());
            dir = d.parent();
        }
    }

    fn list_dir(&self, prefix: &str) -> Result<PathBuf> {
        if prefix.trim_matches('/').is_empty() {
            return Ok(self.base_path.clone());
        }
        self.key_to_path(prefix)
    }
}

/// Stream an open file in fixed-size chunks; the file closes when the stream drops.
pub(crate) fn file_stream(file: fs::File, key: String) -> ByteStream {
    stream::try_unfold((file, key), |(mut file, key)| async move {
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        let n = file
            .read_buf(&mut buf)
            .await
            .map_err(|e| map_io_error(&key, e))?;
        let next = (n > 0).then(|| (buf.freeze(), (file, key)));
        Ok::<_, Error>(next)
    })
    .boxed()
}

async fn remove_if_present(path: &Path, key: &str) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(map_io_error(key, e)),
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Filesystem
    }

    async fn create(
        &self,
        key: &str,
        data: ByteStream,
        options: CreateOptions,
    ) -> Result<ObjectRecord> {
        validate_object_key(key)?;
        let path = self.key_to_path(key)?;

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| map_io_error(key, e))?;
        }

        debug!("Writing {}", path.display());
        self.write_file(key, &path, data, options.if_not_exists).await?;

        if let Err(e) = self.write_sidecar(key, Sidecar::from_options(&options)).await {
            let cleanup = match fs::remove_file(&path).await {
                Ok(()) => Vec::new(),
                Err(rm) => vec![map_io_error(key, rm)],
            };
            return Err(e.with_cleanup(cleanup));
        }

        self.record_for(key, &path).await
    }

    async fn metadata(&self, key: &str) -> Result<ObjectRecord> {
        if key.is_empty() || key.ends_with('/') {
            return Err(Error::NotFound(key.to_string()));
        }
        validate_object_key(key)?;
        let path = self.key_to_path(key)?;
        self.record_for(key, &path).await
    }

    async fn read(&self, key: &str) -> Result<ObjectReader> {
        let record = self.metadata(key).await?;
        let path = self.key_to_path(key)?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| map_io_error(key, e))?;

        Ok(ObjectReader {
            record,
            stream: file_stream(file, key.to_string()),
        })
    }

    async fn list_page(&self, request: &ListRequest) -> Result<ListPage> {
        let limit = request.limit.unwrap_or(self.page_size);
        let base = self.list_dir(&request.prefix)?;
        let prefix = match request.prefix.trim_matches('/') {
            "" => String::new(),
            p => format!("{}/", p),
        };

        // A missing prefix, or one naming a file, is simply empty
        match fs::metadata(&base).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(ListPage::default()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ListPage::default())
            }
            Err(e) => return Err(map_io_error(&request.prefix, e)),
        }

        let mut entries = Vec::new();
        let mut stack = vec![(base, prefix)];
        while let Some((dir, dir_key)) = stack.pop() {
            let mut listing = fs::read_dir(&dir)
                .await
                .map_err(|e| map_io_error(&dir_key, e))?;

            while let Some(entry) = listing
                .next_entry()
                .await
                .map_err(|e| map_io_error(&dir_key, e))?
            {
                let name = entry.file_name().to_string_lossy().to_string();
                if dir_key.is_empty() && name == META_DIR {
                    continue;
                }
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| map_io_error(&name, e))?;
                let key = format!("{}{}", dir_key, name);

                if file_type.is_dir() {
                    if request.delimiter {
                        entries.push(ListEntry::Prefix {
                            key: format!("{}/", key),
                        });
                    } else {
                        stack.push((entry.path(), format!("{}/", key)));
                    }
                    continue;
                }

                match self.record_for(&key, &entry.path()).await {
                    Ok(record) => entries.push(ListEntry::Object(record)),
                    // Removed while we were listing
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(paginate(entries, request.token.as_deref(), limit))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_object_key(key)?;
        let path = self.key_to_path(key)?;

        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| map_io_error(key, e))?;
        if metadata.is_dir() {
            return Err(Error::NotFound(key.to_string()));
        }

        fs::remove_file(&path)
            .await
            .map_err(|e| map_io_error(key, e))?;
        let sidecar = self.sidecar_path(key);
        remove_if_present(&sidecar, key).await?;
        debug!("Deleted {}", path.display());

        self.prune_empty_dirs(path.parent(), &self.base_path).await;
        let meta_root = self.base_path.join(META_DIR);
        self.prune_empty_dirs(sidecar.parent(), &meta_root).await;
        Ok(())
    }
}
