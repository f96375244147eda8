//! Prefix resolution tests across backend shapes.

use storage_gateway_core::resolve::{is_directory, resolve, Resolution};
use storage_gateway_core::storage::{FilesystemBackend, MemoryBackend};
use storage_gateway_core::StorageBackend;

use super::helpers::put;

#[tokio::test]
async fn resolve_object_named_like_prefix_is_object() {
    let backend = MemoryBackend::new();
    put(&backend, "logs", "not empty").await;
    put(&backend, "logs/2024.log", "entry").await;

    match resolve(&backend, "logs").await.unwrap() {
        Resolution::Object(record) => assert_eq!(record.key, "logs"),
        other => panic!("expected object, got {:?}", other),
    }
}

#[tokio::test]
async fn resolve_phantom_marker_is_prefix() {
    let backend = MemoryBackend::new();
    put(&backend, "photos", "").await;
    put(&backend, "photos/a.jpg", "jpeg").await;

    let resolution = resolve(&backend, "photos").await.unwrap();
    match resolution {
        Resolution::Prefix { prefix, marker } => {
            assert_eq!(prefix, "photos/");
            assert_eq!(marker.map(|m| m.key).as_deref(), Some("photos"));
        }
        other => panic!("expected prefix, got {:?}", other),
    }
    assert!(is_directory(&backend, "photos").await.unwrap());
}

#[tokio::test]
async fn resolve_zero_length_file_on_filesystem_is_object() {
    let dir = tempfile::TempDir::new().unwrap();
    let backend = FilesystemBackend::new(dir.path().to_path_buf());
    put(&backend, "empty.txt", "").await;

    let resolution = resolve(&backend, "empty.txt").await.unwrap();
    assert!(matches!(resolution, Resolution::Object(ref r) if r.size == 0));
    assert!(!is_directory(&backend, "empty.txt").await.unwrap());
}

#[tokio::test]
async fn resolve_filesystem_directory_is_prefix() {
    let dir = tempfile::TempDir::new().unwrap();
    let backend = FilesystemBackend::new(dir.path().to_path_buf());
    put(&backend, "dir/inner.txt", "x").await;

    let resolution = resolve(&backend, "dir").await.unwrap();
    assert_eq!(
        resolution,
        Resolution::Prefix {
            prefix: "dir/".to_string(),
            marker: None
        }
    );
    assert!(is_directory(&backend, "dir").await.unwrap());
    assert!(!is_directory(&backend, "nothing-here").await.unwrap());
}

#[tokio::test]
async fn resolve_root_variants() {
    let backend = MemoryBackend::new();
    for root in ["", "/"] {
        assert!(resolve(&backend as &dyn StorageBackend, root)
            .await
            .unwrap()
            .is_prefix());
    }
}
