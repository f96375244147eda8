//! Recursive list and delete.
//!
//! Deletes run page by page under the resolved prefix and repeat whole
//! passes until a pass removes nothing, which absorbs listings that lag
//! behind deletes on eventually consistent stores.

use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::resolve::{resolve, Resolution};
use crate::storage::{ListEntry, ListPage, ListRequest, ObjectRecord, StorageBackend};
use crate::Result;

/// Default bound on repeated delete passes.
pub const DEFAULT_MAX_PASSES: usize = 16;

/// Options for [`delete`].
#[derive(Debug, Clone, Copy)]
pub struct BulkOptions {
    /// Descend into nested prefixes
    pub recursive: bool,
    /// Stop repeating passes after this many
    pub max_passes: usize,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            recursive: false,
            max_passes: DEFAULT_MAX_PASSES,
        }
    }
}

impl BulkOptions {
    pub fn recursive() -> Self {
        Self {
            recursive: true,
            ..Default::default()
        }
    }
}

/// List everything `key` resolves to, following continuation tokens.
pub async fn list_all(
    backend: &dyn StorageBackend,
    key: &str,
    recursive: bool,
) -> Result<Vec<ListEntry>> {
    let prefix = match resolve(backend, key).await? {
        Resolution::Object(record) => return Ok(vec![ListEntry::Object(record)]),
        Resolution::Prefix { prefix, .. } => prefix,
    };

    let mut entries = Vec::new();
    let mut token = None;
    loop {
        let page = backend
            .list_page(
                &ListRequest::new(prefix.as_str())
                    .delimited(!recursive)
                    .after(token.take()),
            )
            .await?;
        entries.extend(page.entries.into_iter().filter(|e| e.key() != prefix));
        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }
    Ok(entries)
}

/// One caller-sized page of what `key` resolves to.
pub async fn list_page(
    backend: &dyn StorageBackend,
    key: &str,
    recursive: bool,
    limit: usize,
    token: Option<String>,
) -> Result<ListPage> {
    let prefix = match resolve(backend, key).await? {
        Resolution::Object(record) => {
            return Ok(ListPage {
                entries: vec![ListEntry::Object(record)],
                next_token: None,
            })
        }
        Resolution::Prefix { prefix, .. } => prefix,
    };

    let mut page = backend
        .list_page(
            &ListRequest::new(prefix.as_str())
                .delimited(!recursive)
                .after(token)
                .limit(limit),
        )
        .await?;
    page.entries.retain(|e| e.key() != prefix);
    Ok(page)
}

/// Delete what `key` resolves to, returning the removed records in order.
///
/// Keys that disappear while the delete runs are skipped silently.
pub async fn delete(
    backend: &dyn StorageBackend,
    key: &str,
    options: BulkOptions,
) -> Result<Vec<ObjectRecord>> {
    let (prefix, marker) = match resolve(backend, key).await? {
        Resolution::Object(record) => {
            return match backend.delete(&record.key).await {
                Ok(()) => Ok(vec![record]),
                Err(e) if e.is_not_found() => Ok(Vec::new()),
                Err(e) => Err(e),
            };
        }
        Resolution::Prefix { prefix, marker } => (prefix, marker),
    };

    let batch_size = backend.max_delete_batch().max(1);
    let max_passes = options.max_passes.max(1);
    let mut removed = Removed::default();

    for pass in 1..=max_passes {
        let removed_in_pass =
            delete_pass(backend, &prefix, options.recursive, batch_size, &mut removed).await?;
        debug!(
            "Delete pass {} under '{}' removed {} objects",
            pass, prefix, removed_in_pass
        );
        if removed_in_pass == 0 {
            break;
        }
        if pass == max_passes {
            warn!(
                "Stopped deleting under '{}' after {} passes; objects may remain",
                prefix, max_passes
            );
        }
    }

    if options.recursive {
        if let Some(marker) = marker {
            match backend.delete(&marker.key).await {
                Ok(()) => {
                    removed.record(marker);
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
    }

    info!("Deleted {} objects under '{}'", removed.records.len(), prefix);
    Ok(removed.records)
}

/// Records removed so far. Stores that acknowledge deletes of absent keys
/// echo the same key again when a lagging listing returns it, so each key
/// counts once.
#[derive(Default)]
struct Removed {
    records: Vec<ObjectRecord>,
    seen: HashSet<String>,
}

impl Removed {
    /// Returns false when `record` was already removed by an earlier batch.
    fn record(&mut self, record: ObjectRecord) -> bool {
        if !self.seen.insert(record.key.clone()) {
            return false;
        }
        self.records.push(record);
        true
    }
}

async fn delete_pass(
    backend: &dyn StorageBackend,
    prefix: &str,
    recursive: bool,
    batch_size: usize,
    removed: &mut Removed,
) -> Result<usize> {
    let mut count = 0;
    let mut token = None;
    loop {
        let page = backend
            .list_page(
                &ListRequest::new(prefix)
                    .delimited(!recursive)
                    .after(token.take()),
            )
            .await?;

        let records: Vec<ObjectRecord> = page
            .entries
            .into_iter()
            .filter_map(|entry| match entry {
                ListEntry::Object(record) if record.key != prefix => Some(record),
                _ => None,
            })
            .collect();

        for batch in records.chunks(batch_size) {
            let keys: Vec<String> = batch.iter().map(|r| r.key.clone()).collect();
            let deleted: HashSet<String> = match backend.delete_many(&keys).await {
                Ok(deleted) => deleted.into_iter().collect(),
                Err(e) if e.is_not_found() => HashSet::new(),
                Err(e) => return Err(e),
            };
            for record in batch {
                if deleted.contains(&record.key) && removed.record(record.clone()) {
                    count += 1;
                }
            }
        }

        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }
    Ok(count)
}
