//! Key/prefix disambiguation.
//!
//! A key can name an object, a prefix standing for a subtree, or a zero-byte
//! "phantom" marker that some object stores create for empty folders. The
//! check for the phantom case is a heuristic: a zero-byte object with at
//! least one key nested below it is treated as a prefix.

use tracing::debug;

use crate::identifier::driver_key;
use crate::storage::{ListRequest, ObjectRecord, StorageBackend};
use crate::Result;

/// What a key refers to on a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A single object
    Object(ObjectRecord),
    /// A prefix to enumerate; empty for the whole backend, otherwise ends with `/`
    Prefix {
        prefix: String,
        /// Zero-byte object that stood in for the prefix
        marker: Option<ObjectRecord>,
    },
}

impl Resolution {
    pub fn is_prefix(&self) -> bool {
        matches!(self, Resolution::Prefix { .. })
    }
}

/// Resolve a relative key (`"/"` or `""` is the backend root).
pub async fn resolve(backend: &dyn StorageBackend, key: &str) -> Result<Resolution> {
    let key = driver_key(key).trim_start_matches('/');

    let mut marker = None;
    if !key.is_empty() && !key.ends_with('/') {
        match backend.metadata(key).await {
            Ok(record) if record.size > 0 => return Ok(Resolution::Object(record)),
            Ok(record) => {
                if !has_children(backend, &format!("{}/", key)).await? {
                    return Ok(Resolution::Object(record));
                }
                debug!("Treating zero-byte object {} as a directory marker", key);
                marker = Some(record);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }

    let prefix = if key.is_empty() || key.ends_with('/') {
        key.to_string()
    } else {
        format!("{}/", key)
    };
    Ok(Resolution::Prefix { prefix, marker })
}

/// Whether any key exists under `prefix`.
pub async fn has_children(backend: &dyn StorageBackend, prefix: &str) -> Result<bool> {
    let page = backend
        .list_page(&ListRequest::new(prefix).delimited(true).limit(2))
        .await?;
    Ok(page.entries.iter().any(|entry| entry.key() != prefix))
}

/// Whether `key` resolves to a prefix rather than a single object.
pub async fn is_directory(backend: &dyn StorageBackend, key: &str) -> Result<bool> {
    let key = driver_key(key);
    if key.is_empty() || key.ends_with('/') {
        return Ok(true);
    }
    match resolve(backend, key).await? {
        Resolution::Object(_) => Ok(false),
        Resolution::Prefix { marker: Some(_), .. } => Ok(true),
        Resolution::Prefix { prefix, marker: None } => has_children(backend, &prefix).await,
    }
}
