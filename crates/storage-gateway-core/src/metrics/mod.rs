//! Gateway metrics.
//!
//! - [`labels`] - Label types for Prometheus metrics dimensions
//! - [`registry`] - The `GatewayMetrics` registry
//! - [`instrumented_storage`] - Storage backend decorator with metrics instrumentation
//!
//! The registry is served at `/metrics` by the gateway HTTP server.

pub mod instrumented_storage;
pub mod labels;
pub mod registry;

pub use instrumented_storage::InstrumentedBackend;
pub use labels::{
    BackendLabels, RequestLabels, StorageErrorLabels, StorageLabels, StorageOperation,
};
pub use registry::GatewayMetrics;
