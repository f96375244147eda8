//! S3-compatible storage backend using object_store.

use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use std::sync::Arc;
use tracing::info;

use super::flat::FlatStore;
use super::{
    BackendKind, ByteStream, CreateOptions, ListPage, ListRequest, ObjectReader, ObjectRecord,
    StorageBackend, DEFAULT_PAGE_SIZE,
};
use crate::multipart::{DEFAULT_PART_SIZE, MIN_S3_PART_SIZE};
use crate::{Error, Result};

/// S3 DeleteObjects accepts at most this many keys per request.
const S3_MAX_DELETE_BATCH: usize = 1000;

/// S3 storage backend configuration
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,
    /// AWS region
    pub region: Option<String>,
    /// Custom endpoint (for S3-compatible services like MinIO)
    pub endpoint: Option<String>,
    /// Access key ID
    pub access_key_id: Option<String>,
    /// Secret access key
    pub secret_access_key: Option<String>,
    /// Key prefix for all operations
    pub prefix: Option<String>,
    /// Use path-style requests
    pub path_style: bool,
    /// Allow HTTP (insecure) connections
    pub allow_http: bool,
    /// Multipart part size, raised to the S3 minimum when smaller
    pub part_size: usize,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: Some("us-east-1".to_string()),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            prefix: None,
            path_style: false,
            allow_http: false,
            part_size: DEFAULT_PART_SIZE,
        }
    }
}

/// S3 storage backend
pub struct S3Backend {
    flat: FlatStore,
}

impl S3Backend {
    /// Create a new S3 backend
    pub fn new(config: S3Config) -> Result<Self> {
        let mut builder = AmazonS3Builder::from_env().with_bucket_name(&config.bucket);

        if let Some(region) = &config.region {
            builder = builder.with_region(region);
        }

        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
        }

        if config.path_style || config.endpoint.is_some() {
            builder = builder.with_virtual_hosted_style_request(false);
        }

        if let Some(access_key) = &config.access_key_id {
            builder = builder.with_access_key_id(access_key);
        }

        if let Some(secret_key) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret_key);
        }

        if config.allow_http {
            builder = builder.with_allow_http(true);
        }

        let store = builder
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to create S3 client: {}", e)))?;

        let part_size = config.part_size.max(MIN_S3_PART_SIZE);
        info!(
            "Created S3 backend for bucket: {}, prefix: {:?}, part size: {}",
            config.bucket, config.prefix, part_size
        );

        Ok(Self {
            flat: FlatStore::new(
                Arc::new(store),
                BackendKind::S3,
                config.prefix.as_deref(),
                part_size,
                DEFAULT_PAGE_SIZE,
            ),
        })
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn kind(&self) -> BackendKind {
        BackendKind::S3
    }

    fn max_delete_batch(&self) -> usize {
        S3_MAX_DELETE_BATCH
    }

    async fn create(
        &self,
        key: &str,
        data: ByteStream,
        options: CreateOptions,
    ) -> Result<ObjectRecord> {
        self.flat.create(key, data, options).await
    }

    async fn metadata(&self, key: &str) -> Result<ObjectRecord> {
        self.flat.metadata(key).await
    }

    async fn read(&self, key: &str) -> Result<ObjectReader> {
        self.flat.read(key).await
    }

    async fn list_page(&self, request: &ListRequest) -> Result<ListPage> {
        self.flat.list_page(request).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.flat.delete(key).await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<Vec<String>> {
        self.flat.delete_many(keys).await
    }
}
