//! Bulk list and delete tests.
//!
//! The same scenarios run against the memory and filesystem backends so
//! flat and hierarchical stores are held to one contract.

use std::sync::Arc;
use storage_gateway_core::bulk::{self, BulkOptions};
use storage_gateway_core::storage::{FilesystemBackend, MemoryBackend};
use storage_gateway_core::{ListEntry, StorageBackend};

use super::helpers::{all_keys, put, LaggingListing, SmallBatches, A_TXT};

async fn seed(backend: &dyn StorageBackend) {
    put(backend, "a.txt", A_TXT).await;
    put(backend, "dir/b.txt", "bravo").await;
    put(backend, "dir/c.txt", "charlie").await;
}

async fn backends() -> (Vec<Arc<dyn StorageBackend>>, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().unwrap();
    let backends: Vec<Arc<dyn StorageBackend>> = vec![
        Arc::new(MemoryBackend::new()),
        Arc::new(FilesystemBackend::new(dir.path().to_path_buf())),
    ];
    for backend in &backends {
        seed(backend.as_ref()).await;
    }
    (backends, dir)
}

#[tokio::test]
async fn bulk_recursive_delete_removes_exactly_the_subtree() {
    let (backends, _dir) = backends().await;
    for backend in backends {
        let deleted = bulk::delete(backend.as_ref(), "dir", BulkOptions::recursive())
            .await
            .unwrap();
        let mut keys: Vec<&str> = deleted.iter().map(|r| r.key.as_str()).collect();
        keys.sort();
        assert_eq!(keys, vec!["dir/b.txt", "dir/c.txt"], "{}", backend.kind());
        assert_eq!(all_keys(backend.as_ref()).await, vec!["a.txt"], "{}", backend.kind());
    }
}

#[tokio::test]
async fn bulk_root_listing_groups_directories() {
    let (backends, _dir) = backends().await;
    for backend in backends {
        let entries = bulk::list_all(backend.as_ref(), "/", false).await.unwrap();
        let keys: Vec<&str> = entries.iter().map(ListEntry::key).collect();
        assert_eq!(keys, vec!["a.txt", "dir/"], "{}", backend.kind());
        assert!(matches!(entries[1], ListEntry::Prefix { .. }));
    }
}

#[tokio::test]
async fn bulk_recursive_listing_flattens() {
    let (backends, _dir) = backends().await;
    for backend in backends {
        let entries = bulk::list_all(backend.as_ref(), "", true).await.unwrap();
        let keys: Vec<&str> = entries.iter().map(ListEntry::key).collect();
        assert_eq!(keys, vec!["a.txt", "dir/b.txt", "dir/c.txt"], "{}", backend.kind());
    }
}

#[tokio::test]
async fn bulk_delete_of_object_removes_only_it() {
    let (backends, _dir) = backends().await;
    for backend in backends {
        let deleted = bulk::delete(backend.as_ref(), "a.txt", BulkOptions::recursive())
            .await
            .unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(deleted[0].size, 11);
        assert_eq!(
            all_keys(backend.as_ref()).await,
            vec!["dir/b.txt", "dir/c.txt"],
            "{}",
            backend.kind()
        );
    }
}

#[tokio::test]
async fn bulk_recursive_delete_with_phantom_marker() {
    let backend = MemoryBackend::new();
    put(&backend, "keep.txt", "keep").await;
    put(&backend, "album", "").await;
    put(&backend, "album/1.jpg", "one").await;
    put(&backend, "album/nested/2.jpg", "two").await;

    let deleted = bulk::delete(&backend, "album", BulkOptions::recursive())
        .await
        .unwrap();
    let keys: Vec<&str> = deleted.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys.last(), Some(&"album"), "marker goes last");
    assert_eq!(deleted.len(), 3);
    assert_eq!(all_keys(&backend).await, vec!["keep.txt"]);
}

#[tokio::test]
async fn bulk_paging_covers_every_entry_once() {
    let backend = MemoryBackend::new();
    for i in 0..7 {
        put(&backend, &format!("logs/{}.log", i), "x").await;
    }

    let mut seen = Vec::new();
    let mut token = None;
    loop {
        let page = bulk::list_page(&backend, "logs", true, 3, token.take())
            .await
            .unwrap();
        assert!(page.entries.len() <= 3);
        seen.extend(page.entries.iter().map(|e| e.key().to_string()));
        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }
    let expected: Vec<String> = (0..7).map(|i| format!("logs/{}.log", i)).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn bulk_delete_then_get_is_not_found() {
    let (backends, _dir) = backends().await;
    for backend in backends {
        bulk::delete(backend.as_ref(), "dir", BulkOptions::recursive())
            .await
            .unwrap();
        let err = backend.metadata("dir/b.txt").await.unwrap_err();
        assert!(err.is_not_found(), "{}", backend.kind());
    }
}

#[tokio::test]
async fn bulk_delete_respects_backend_batch_limit() {
    let backend = SmallBatches::default();
    for i in 0..5 {
        put(&backend, &format!("batch/{}.bin", i), "x").await;
    }

    let deleted = bulk::delete(&backend, "batch", BulkOptions::recursive())
        .await
        .unwrap();
    assert_eq!(deleted.len(), 5);

    let batches = backend.batches.lock().clone();
    assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= 2), "{:?}", batches);
    let sent: usize = batches.iter().map(Vec::len).sum();
    assert_eq!(sent, 5);
    assert!(all_keys(&backend).await.is_empty());
}

#[tokio::test]
async fn bulk_delete_repeats_until_late_objects_are_gone() {
    let backend = LaggingListing::default();
    put(&backend, "dir/b.txt", "bravo").await;
    put(&backend, "dir/c.txt", "charlie").await;
    put(&backend, "dir/late.txt", "late").await;
    backend.late.lock().insert("dir/late.txt".to_string());

    let deleted = bulk::delete(&backend, "dir", BulkOptions::recursive())
        .await
        .unwrap();
    let mut keys: Vec<&str> = deleted.iter().map(|r| r.key.as_str()).collect();
    keys.sort();
    assert_eq!(keys, vec!["dir/b.txt", "dir/c.txt", "dir/late.txt"]);
    assert!(!backend.inner.exists("dir/late.txt").await.unwrap());
}

#[tokio::test]
async fn bulk_delete_counts_echoed_keys_once() {
    let backend = LaggingListing::default();
    put(&backend, "dir/b.txt", "bravo").await;
    put(&backend, "dir/c.txt", "charlie").await;

    let options = BulkOptions {
        recursive: true,
        max_passes: 4,
    };
    let deleted = bulk::delete(&backend, "dir", options).await.unwrap();
    let keys: Vec<&str> = deleted.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, vec!["dir/b.txt", "dir/c.txt"]);
}
