//! Label types for Prometheus metrics.
//!
//! This module defines the label types used for metrics dimensions,
//! following the prometheus-client crate patterns.

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use std::fmt::Write;

use crate::error::ErrorKind;

/// Labels for HTTP request counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub method: String,
    pub status: String,
}

impl RequestLabels {
    pub fn new(method: impl Into<String>, status: u16) -> Self {
        Self {
            method: method.into(),
            status: status.to_string(),
        }
    }
}

/// Labels for storage operation metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StorageLabels {
    pub backend: String,
    pub operation: StorageOperation,
}

impl StorageLabels {
    pub fn new(backend: impl Into<String>, operation: StorageOperation) -> Self {
        Self {
            backend: backend.into(),
            operation,
        }
    }
}

/// Labels for byte counters (backend only).
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BackendLabels {
    pub backend: String,
}

impl BackendLabels {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
        }
    }
}

/// Labels for storage error metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StorageErrorLabels {
    pub backend: String,
    pub error_kind: String,
}

impl StorageErrorLabels {
    pub fn new(backend: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            backend: backend.into(),
            error_kind: kind.as_str().to_string(),
        }
    }
}

/// Storage operation type for latency metrics.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum StorageOperation {
    Create,
    Metadata,
    Read,
    List,
    Delete,
    DeleteMany,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::Create => "create",
            StorageOperation::Metadata => "metadata",
            StorageOperation::Read => "read",
            StorageOperation::List => "list",
            StorageOperation::Delete => "delete",
            StorageOperation::DeleteMany => "delete_many",
        }
    }
}

impl EncodeLabelValue for StorageOperation {
    fn encode(
        &self,
        encoder: &mut prometheus_client::encoding::LabelValueEncoder,
    ) -> std::result::Result<(), std::fmt::Error> {
        encoder.write_str(self.as_str())
    }
}
