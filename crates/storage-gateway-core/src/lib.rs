//! Storage Gateway Core Library
//!
//! This crate resolves `scheme://host/path` identifiers onto registered
//! storage backends (filesystem, memory, S3-compatible) and serves them over
//! HTTP: downloads with conditional requests, uploads, listings and
//! recursive deletes.

pub mod bulk;
pub mod config;
pub mod error;
pub mod http;
pub mod identifier;
pub mod metrics;
pub mod multipart;
pub mod registry;
pub mod resolve;
pub mod storage;

pub use bulk::BulkOptions;
pub use config::{BackendConfig, GatewayConfig, ServerConfig};
pub use error::{Error, ErrorKind, Result};
pub use http::{GatewayServer, GatewayState, UploadEvent};
pub use identifier::Identifier;
pub use metrics::GatewayMetrics;
pub use registry::{Dispatched, Registration, Registry};
pub use resolve::Resolution;
pub use storage::{
    create_backend, BackendKind, ByteStream, CreateOptions, ListEntry, ListPage, ListRequest,
    ObjectReader, ObjectRecord, StorageBackend, StorageBackendConfig,
};
