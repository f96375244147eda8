//! Storage backend abstraction and implementations.
//!
//! One object contract over three storage models:
//!
//! - **Filesystem**: hierarchical, real directories
//! - **Memory**: flat in-memory map
//! - **S3**: AWS S3 and S3-compatible services (MinIO, Ceph RGW, etc.)

mod backend;
mod config;
mod filesystem;
mod flat;
mod memory;
mod s3;

pub use backend::{
    bytes_stream, collect_bytes, BackendKind, ByteStream, CreateOptions, ListEntry, ListPage,
    ListRequest, ObjectReader, ObjectRecord, StorageBackend, DEFAULT_DELETE_BATCH,
    DEFAULT_PAGE_SIZE,
};
pub use config::StorageBackendConfig;
pub use filesystem::{FilesystemBackend, META_DIR};
pub(crate) use filesystem::file_stream;
pub use memory::MemoryBackend;
pub use s3::{S3Backend, S3Config};

use crate::Result;
use std::sync::Arc;

/// Create a storage backend from configuration.
///
/// `part_size` is the multipart threshold for flat stores; S3 raises it to
/// its own minimum.
pub fn create_backend(
    config: &StorageBackendConfig,
    part_size: usize,
) -> Result<Arc<dyn StorageBackend>> {
    match config {
        StorageBackendConfig::S3 {
            bucket,
            region,
            endpoint,
            access_key,
            secret_key,
            prefix,
            path_style,
            allow_http,
        } => {
            let s3_config = S3Config {
                bucket: bucket.clone(),
                region: region.clone(),
                endpoint: endpoint.clone(),
                access_key_id: access_key.clone(),
                secret_access_key: secret_key.clone(),
                prefix: prefix.clone(),
                path_style: *path_style,
                allow_http: *allow_http,
                part_size,
            };
            Ok(Arc::new(S3Backend::new(s3_config)?))
        }

        StorageBackendConfig::Filesystem { path } => {
            Ok(Arc::new(FilesystemBackend::new(path.clone())))
        }

        StorageBackendConfig::Memory => Ok(Arc::new(MemoryBackend::with_part_size(part_size))),
    }
}
