//! Prometheus metrics registry for the gateway.

use parking_lot::RwLock;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;
use std::time::Instant;

use super::labels::{
    BackendLabels, RequestLabels, StorageErrorLabels, StorageLabels, StorageOperation,
};
use crate::error::ErrorKind;

/// Storage latency histogram buckets (in seconds).
/// Covers local disk through cloud storage: 1ms to 10s.
const STORAGE_LATENCY_BUCKETS: [f64; 10] =
    [0.001, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Prometheus metrics registry for the gateway.
pub struct GatewayMetrics {
    /// Internal prometheus-client registry.
    registry: RwLock<Registry>,

    /// HTTP requests by method and status.
    pub requests_total: Family<RequestLabels, Counter>,

    /// Storage operation latency by backend and operation.
    pub storage_latency_seconds: Family<StorageLabels, Histogram>,

    /// Bytes written to storage.
    pub storage_write_bytes_total: Family<BackendLabels, Counter>,

    /// Bytes read from storage.
    pub storage_read_bytes_total: Family<BackendLabels, Counter>,

    /// Storage errors by backend and error kind.
    pub storage_errors_total: Family<StorageErrorLabels, Counter>,

    /// Objects removed by delete operations.
    pub objects_deleted_total: Family<BackendLabels, Counter>,

    start_time: Instant,
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let requests_total = Family::<RequestLabels, Counter>::default();
        let storage_latency_seconds =
            Family::<StorageLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(STORAGE_LATENCY_BUCKETS.iter().cloned())
            });
        let storage_write_bytes_total = Family::<BackendLabels, Counter>::default();
        let storage_read_bytes_total = Family::<BackendLabels, Counter>::default();
        let storage_errors_total = Family::<StorageErrorLabels, Counter>::default();
        let objects_deleted_total = Family::<BackendLabels, Counter>::default();

        registry.register(
            "storage_gateway_requests",
            "HTTP requests by method and status",
            requests_total.clone(),
        );
        registry.register(
            "storage_gateway_storage_latency_seconds",
            "Storage operation latency by backend and operation",
            storage_latency_seconds.clone(),
        );
        registry.register(
            "storage_gateway_storage_write_bytes",
            "Bytes written to storage",
            storage_write_bytes_total.clone(),
        );
        registry.register(
            "storage_gateway_storage_read_bytes",
            "Bytes read from storage",
            storage_read_bytes_total.clone(),
        );
        registry.register(
            "storage_gateway_storage_errors",
            "Storage operation errors by kind",
            storage_errors_total.clone(),
        );
        registry.register(
            "storage_gateway_objects_deleted",
            "Objects removed by delete operations",
            objects_deleted_total.clone(),
        );

        Self {
            registry: RwLock::new(registry),
            requests_total,
            storage_latency_seconds,
            storage_write_bytes_total,
            storage_read_bytes_total,
            storage_errors_total,
            objects_deleted_total,
            start_time: Instant::now(),
        }
    }

    pub fn record_request(&self, method: &str, status: u16) {
        self.requests_total
            .get_or_create(&RequestLabels::new(method, status))
            .inc();
    }

    pub fn record_storage_latency(
        &self,
        backend: &str,
        operation: StorageOperation,
        latency_secs: f64,
    ) {
        self.storage_latency_seconds
            .get_or_create(&StorageLabels::new(backend, operation))
            .observe(latency_secs);
    }

    pub fn inc_storage_write_bytes(&self, backend: &str, bytes: u64) {
        self.storage_write_bytes_total
            .get_or_create(&BackendLabels::new(backend))
            .inc_by(bytes);
    }

    pub fn inc_storage_read_bytes(&self, backend: &str, bytes: u64) {
        self.storage_read_bytes_total
            .get_or_create(&BackendLabels::new(backend))
            .inc_by(bytes);
    }

    pub fn inc_storage_error(&self, backend: &str, kind: ErrorKind) {
        self.storage_errors_total
            .get_or_create(&StorageErrorLabels::new(backend, kind))
            .inc();
    }

    pub fn inc_objects_deleted(&self, backend: &str, count: u64) {
        self.objects_deleted_total
            .get_or_create(&BackendLabels::new(backend))
            .inc_by(count);
    }

    /// Time since the registry was created.
    pub fn uptime(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Encode all metrics to Prometheus text format.
    pub fn encode(&self) -> String {
        let registry = self.registry.read();
        let mut buffer = String::new();
        if encode(&mut buffer, &registry).is_err() {
            return String::new();
        }
        buffer
    }
}
