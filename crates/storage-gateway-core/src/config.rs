//! Configuration structures for the storage gateway.

use serde::{Deserialize, Deserializer, Serialize};
use std::net::SocketAddr;
use std::path::Path;

use crate::storage::StorageBackendConfig;
use crate::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Backends to register, each under its own identifier prefix
    pub backends: Vec<BackendConfig>,
}

/// HTTP server and transfer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Multipart part size in bytes (default: 8 MiB)
    #[serde(default = "default_part_size")]
    pub part_size: usize,

    /// Bytes between progress events on streamed uploads (default: 1 MiB)
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    /// Default list page size when the request has no `limit` (default: 1000)
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,

    /// Upper bound on repeated passes of a recursive delete (default: 16)
    #[serde(default = "default_max_delete_passes")]
    pub max_delete_passes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            part_size: default_part_size(),
            progress_interval: default_progress_interval(),
            list_page_size: default_list_page_size(),
            max_delete_passes: default_max_delete_passes(),
        }
    }
}

/// One backend registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Unique backend name
    pub name: String,

    /// Identifier prefix served by this backend, e.g. `s3://media/`
    pub prefix: String,

    /// Storage behind the prefix, either a `backend:` table or a storage
    /// URL such as `s3://bucket/prefix?region=eu-west-1` or `file:///srv`
    #[serde(deserialize_with = "storage_table_or_url")]
    pub storage: StorageBackendConfig,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StorageSpec {
    Url(String),
    Table(StorageBackendConfig),
}

fn storage_table_or_url<'de, D>(
    deserializer: D,
) -> std::result::Result<StorageBackendConfig, D::Error>
where
    D: Deserializer<'de>,
{
    match StorageSpec::deserialize(deserializer)? {
        StorageSpec::Url(url) => {
            StorageBackendConfig::from_url(&url).map_err(serde::de::Error::custom)
        }
        StorageSpec::Table(config) => Ok(config),
    }
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_part_size() -> usize {
    crate::multipart::DEFAULT_PART_SIZE
}

fn default_progress_interval() -> u64 {
    1024 * 1024
}

fn default_list_page_size() -> usize {
    crate::storage::DEFAULT_PAGE_SIZE
}

fn default_max_delete_passes() -> usize {
    crate::bulk::DEFAULT_MAX_PASSES
}

impl GatewayConfig {
    /// Parse YAML configuration
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a YAML configuration file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Check settings that serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(Error::Configuration(
                "at least one backend must be configured".to_string(),
            ));
        }
        if self.server.part_size == 0 {
            return Err(Error::Configuration("part_size must be positive".to_string()));
        }
        if self.server.progress_interval == 0 {
            return Err(Error::Configuration(
                "progress_interval must be positive".to_string(),
            ));
        }
        if self.server.list_page_size == 0 {
            return Err(Error::Configuration(
                "list_page_size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
