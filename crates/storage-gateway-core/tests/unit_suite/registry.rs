//! Registry construction and dispatch tests.

use std::sync::Arc;
use storage_gateway_core::storage::MemoryBackend;
use storage_gateway_core::{
    BackendKind, Error, GatewayConfig, GatewayMetrics, Identifier, Registry,
};

use super::helpers::put;

fn config_yaml(root: &std::path::Path) -> String {
    format!(
        r#"
backends:
  - name: scratch
    prefix: mem://scratch/
    storage:
      backend: memory
  - name: files
    prefix: file:///srv/files/
    storage:
      backend: filesystem
      path: {}
"#,
        root.display()
    )
}

#[tokio::test]
async fn registry_from_config_dispatches_to_each_backend() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = GatewayConfig::from_yaml(&config_yaml(dir.path())).unwrap();
    let registry = Registry::from_config(&config, None).unwrap();
    assert_eq!(registry.len(), 2);

    let mem = registry
        .dispatch(&Identifier::resolve("mem://scratch/a/b.txt").unwrap())
        .unwrap();
    assert_eq!(mem.registration.name, "scratch");
    assert_eq!(mem.key, "a/b.txt");
    assert_eq!(mem.backend().kind(), BackendKind::Memory);

    let files = registry
        .dispatch(&Identifier::resolve("file:///srv/files/report.csv").unwrap())
        .unwrap();
    assert_eq!(files.backend().kind(), BackendKind::Filesystem);
    put(files.backend().as_ref(), &files.key, "x,y\n").await;
    assert!(dir.path().join("report.csv").exists());
}

#[tokio::test]
async fn registry_instruments_backends_when_metrics_given() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = GatewayConfig::from_yaml(&config_yaml(dir.path())).unwrap();
    let metrics = Arc::new(GatewayMetrics::new());
    let registry = Registry::from_config(&config, Some(Arc::clone(&metrics))).unwrap();

    let scratch = registry.get("scratch").unwrap();
    put(scratch.backend.as_ref(), "a.txt", "hello").await;

    let text = metrics.encode();
    assert!(text.contains("storage_gateway_storage_write_bytes_total{backend=\"scratch\"} 5"));
}

#[test]
fn registry_rejects_nested_prefixes() {
    let mut registry = Registry::new();
    registry
        .register(
            "outer",
            Identifier::resolve("s3://media/").unwrap(),
            Arc::new(MemoryBackend::new()),
        )
        .unwrap();
    let err = registry
        .register(
            "inner",
            Identifier::resolve("s3://media/photos/").unwrap(),
            Arc::new(MemoryBackend::new()),
        )
        .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    assert_eq!(registry.len(), 1);
}

#[test]
fn registry_unmatched_identifier_is_not_handled() {
    let registry = Registry::new();
    let err = registry
        .dispatch(&Identifier::resolve("s3://nowhere/x").unwrap())
        .unwrap_err();
    assert!(matches!(err, Error::NotHandled(_)));
}
