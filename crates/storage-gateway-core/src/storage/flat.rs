//! Flat key-value namespace on top of `object_store`.
//!
//! The memory and S3 drivers share this implementation. Keys are mapped to
//! `object_store` paths under an optional bucket prefix; directories only
//! exist as common prefixes of object paths.

use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use object_store::path::Path;
use object_store::{
    Attribute, AttributeValue, Attributes, GetOptions, ObjectMeta, ObjectStore, PutMode,
    PutMultipartOptions, PutOptions, PutPayload,
};
use percent_encoding::percent_decode_str;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::backend::{paginate, validate_object_key};
use super::{
    BackendKind, ByteStream, CreateOptions, ListEntry, ListPage, ListRequest, ObjectReader,
    ObjectRecord,
};
use crate::error::map_object_store_error;
use crate::multipart::{upload_parts, ObjectStoreSession, PartChunker};
use crate::{Error, Result};

/// Concurrent existence probes issued by [`FlatStore::delete_many`].
const HEAD_CONCURRENCY: usize = 16;

pub(crate) struct FlatStore {
    store: Arc<dyn ObjectStore>,
    kind: BackendKind,
    prefix: Option<Path>,
    part_size: usize,
    page_size: usize,
}

impl FlatStore {
    pub(crate) fn new(
        store: Arc<dyn ObjectStore>,
        kind: BackendKind,
        prefix: Option<&str>,
        part_size: usize,
        page_size: usize,
    ) -> Self {
        let prefix = prefix
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .map(Path::from);
        Self {
            store,
            kind,
            prefix,
            part_size,
            page_size: page_size.max(1),
        }
    }

    pub(crate) fn kind(&self) -> BackendKind {
        self.kind
    }

    pub(crate) fn part_size(&self) -> usize {
        self.part_size
    }

    /// Full path for a key
    fn location(&self, key: &str) -> Path {
        let key = key.trim_matches('/');
        match &self.prefix {
            Some(prefix) if key.is_empty() => prefix.clone(),
            Some(prefix) => Path::from(format!("{}/{}", prefix, key)),
            None => Path::from(key),
        }
    }

    /// Path to list under, `None` meaning the whole store
    fn list_root(&self, prefix: &str) -> Option<Path> {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            return self.prefix.clone();
        }
        Some(self.location(prefix))
    }

    /// Backend key of a store path, with the bucket prefix removed
    fn key_of(&self, location: &Path) -> Option<String> {
        let parts: Vec<String> = match &self.prefix {
            Some(prefix) => location
                .prefix_match(prefix)?
                .map(|p| decode_part(p.as_ref()))
                .collect(),
            None => location.parts().map(|p| decode_part(p.as_ref())).collect(),
        };
        if parts.is_empty() {
            return None;
        }
        Some(parts.join("/"))
    }

    fn record_from(&self, key: &str, meta: &ObjectMeta, attributes: &Attributes) -> ObjectRecord {
        let mut user_metadata = BTreeMap::new();
        let mut content_type = None;
        for (attribute, value) in attributes.iter() {
            match attribute {
                Attribute::ContentType => content_type = Some(value.to_string()),
                Attribute::Metadata(name) => {
                    user_metadata.insert(name.to_string(), value.to_string());
                }
                _ => {}
            }
        }
        ObjectRecord {
            key: key.to_string(),
            size: meta.size,
            last_modified: meta.last_modified,
            content_type,
            e_tag: meta.e_tag.clone(),
            user_metadata,
        }
    }

    fn listed_record(&self, meta: &ObjectMeta) -> Option<ObjectRecord> {
        let key = self.key_of(&meta.location)?;
        Some(self.record_from(&key, meta, &Attributes::new()))
    }

    pub(crate) async fn create(
        &self,
        key: &str,
        data: ByteStream,
        options: CreateOptions,
    ) -> Result<ObjectRecord> {
        validate_object_key(key)?;
        let location = self.location(key);
        let attributes = attributes_for(&options);

        let mut chunker = PartChunker::new(data, self.part_size);
        let first = chunker.next_part().await?.unwrap_or_default();

        let (size, e_tag) = if chunker.is_exhausted() {
            let size = first.len() as u64;
            let mode = if options.if_not_exists {
                PutMode::Create
            } else {
                PutMode::Overwrite
            };
            debug!("{} PUT: {} ({} bytes)", self.kind, location, size);
            let result = self
                .store
                .put_opts(
                    &location,
                    PutPayload::from_bytes(first),
                    PutOptions {
                        mode,
                        attributes,
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| map_object_store_error(key, e))?;
            (size, result.e_tag)
        } else {
            if options.if_not_exists && self.exists(key).await? {
                return Err(Error::Conflict(format!("{} already exists", key)));
            }
            debug!("{} multipart PUT: {}", self.kind, location);
            let upload = self
                .store
                .put_multipart_opts(
                    &location,
                    PutMultipartOptions {
                        attributes,
                        ..Default::default()
                    },
                )
                .await
                .map_err(|e| map_object_store_error(key, e))?;
            let session = ObjectStoreSession::new(upload, key);
            let summary = upload_parts(session, location.as_ref(), first, chunker).await?;
            (summary.size, summary.e_tag)
        };

        match self.metadata(key).await {
            Ok(record) => Ok(record),
            // Not yet visible on an eventually consistent store
            Err(e) if e.is_not_found() => Ok(ObjectRecord {
                key: key.to_string(),
                size,
                last_modified: Utc::now(),
                content_type: options.content_type,
                e_tag,
                user_metadata: options.user_metadata,
            }),
            Err(e) => Err(e),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self.metadata(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub(crate) async fn metadata(&self, key: &str) -> Result<ObjectRecord> {
        check_lookup_key(key)?;
        let location = self.location(key);
        debug!("{} HEAD: {}", self.kind, location);
        let result = self
            .store
            .get_opts(
                &location,
                GetOptions {
                    head: true,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| map_object_store_error(key, e))?;
        Ok(self.record_from(key, &result.meta, &result.attributes))
    }

    pub(crate) async fn read(&self, key: &str) -> Result<ObjectReader> {
        check_lookup_key(key)?;
        let location = self.location(key);
        debug!("{} GET: {}", self.kind, location);
        let result = self
            .store
            .get_opts(&location, GetOptions::default())
            .await
            .map_err(|e| map_object_store_error(key, e))?;
        let record = self.record_from(key, &result.meta, &result.attributes);
        let owned_key = key.to_string();
        let stream = result
            .into_stream()
            .map_err(move |e| map_object_store_error(&owned_key, e))
            .boxed();
        Ok(ObjectReader { record, stream })
    }

    pub(crate) async fn list_page(&self, request: &ListRequest) -> Result<ListPage> {
        let root = self.list_root(&request.prefix);
        let limit = request.limit.unwrap_or(self.page_size);
        let own_key = request.prefix.trim_end_matches('/');
        debug!(
            "{} LIST: {:?} (delimiter: {}, token: {:?})",
            self.kind, root, request.delimiter, request.token
        );

        let mut entries = Vec::new();
        if request.delimiter {
            let listing = self
                .store
                .list_with_delimiter(root.as_ref())
                .await
                .map_err(|e| map_object_store_error(&request.prefix, e))?;
            for prefix in &listing.common_prefixes {
                if let Some(key) = self.key_of(prefix) {
                    entries.push(ListEntry::Prefix {
                        key: format!("{}/", key),
                    });
                }
            }
            entries.extend(
                listing
                    .objects
                    .iter()
                    .filter_map(|meta| self.listed_record(meta))
                    .filter(|record| record.key != own_key)
                    .map(ListEntry::Object),
            );
        } else {
            let mut listing = match &request.token {
                Some(token) => {
                    let offset = self.location(token);
                    self.store.list_with_offset(root.as_ref(), &offset)
                }
                None => self.store.list(root.as_ref()),
            };
            // One extra entry tells us whether another page exists.
            while let Some(meta) = listing.next().await {
                let meta = meta.map_err(|e| map_object_store_error(&request.prefix, e))?;
                if let Some(record) = self.listed_record(&meta) {
                    if record.key != own_key {
                        entries.push(ListEntry::Object(record));
                    }
                }
                if entries.len() > limit {
                    break;
                }
            }
        }

        Ok(paginate(entries, request.token.as_deref(), limit))
    }

    pub(crate) async fn delete(&self, key: &str) -> Result<()> {
        validate_object_key(key)?;
        let location = self.location(key);
        // object_store deletes are idempotent; surface NotFound ourselves
        self.store
            .head(&location)
            .await
            .map_err(|e| map_object_store_error(key, e))?;
        debug!("{} DELETE: {}", self.kind, location);
        self.store
            .delete(&location)
            .await
            .map_err(|e| map_object_store_error(key, e))
    }

    pub(crate) async fn delete_many(&self, keys: &[String]) -> Result<Vec<String>> {
        for key in keys {
            validate_object_key(key)?;
        }
        // Batch deletes acknowledge absent keys, so only present ones are sent
        let present: Vec<Option<Path>> = stream::iter(keys.iter().cloned())
            .map(|key| async move {
                let location = self.location(&key);
                match self.store.head(&location).await {
                    Ok(_) => Ok(Some(location)),
                    Err(object_store::Error::NotFound { .. }) => Ok(None),
                    Err(e) => Err(map_object_store_error(&key, e)),
                }
            })
            .buffered(HEAD_CONCURRENCY)
            .try_collect()
            .await?;
        let locations: Vec<object_store::Result<Path>> =
            present.into_iter().flatten().map(Ok).collect();
        debug!(
            "{} DELETE batch of {} keys ({} present)",
            self.kind,
            keys.len(),
            locations.len()
        );

        let mut results = self.store.delete_stream(stream::iter(locations).boxed());
        let mut deleted = Vec::with_capacity(keys.len());
        while let Some(result) = results.next().await {
            match result {
                Ok(location) => {
                    if let Some(key) = self.key_of(&location) {
                        deleted.push(key);
                    }
                }
                Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(map_object_store_error("batch delete", e)),
            }
        }
        Ok(deleted)
    }
}

fn decode_part(part: &str) -> String {
    percent_decode_str(part).decode_utf8_lossy().into_owned()
}

/// Prefix-shaped keys never name an object on a flat store.
fn check_lookup_key(key: &str) -> Result<()> {
    if key.is_empty() || key.ends_with('/') {
        return Err(Error::NotFound(key.to_string()));
    }
    validate_object_key(key)
}

fn attributes_for(options: &CreateOptions) -> Attributes {
    let mut attributes = Attributes::new();
    if let Some(content_type) = &options.content_type {
        attributes.insert(
            Attribute::ContentType,
            AttributeValue::from(content_type.clone()),
        );
    }
    for (name, value) in &options.user_metadata {
        attributes.insert(
            Attribute::Metadata(name.clone().into()),
            AttributeValue::from(value.clone()),
        );
    }
    attributes
}

/// Drain into `Bytes` for tests and small payloads.
#[cfg(test)]
pub(crate) async fn read_all(store: &FlatStore, key: &str) -> Result<bytes::Bytes> {
    store.read(key).await?.bytes().await
}
