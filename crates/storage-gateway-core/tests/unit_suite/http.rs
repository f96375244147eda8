//! HTTP handler tests.
//!
//! Requests go straight into `handle_request` with in-memory bodies:
//! - Downloads, HEAD and conditional requests
//! - Create-only PUT and metadata headers
//! - Listing and recursive delete
//! - Multipart uploads, plain and streamed

use bytes::Bytes;
use http_body_util::Full;
use hyper::StatusCode;
use std::sync::Arc;
use storage_gateway_core::storage::MemoryBackend;
use storage_gateway_core::StorageBackend;

use super::helpers::{
    all_keys, empty_body, form, gateway, put, request, scenario_backend, send, RefusingWrites,
    A_TXT,
};

#[tokio::test]
async fn http_get_returns_body_and_record_headers() {
    let backend = scenario_backend().await;
    let state = gateway(backend);

    let reply = send(&state, request("GET", "/mem/test/a.txt").body(empty_body()).unwrap()).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(&reply.body[..], A_TXT.as_bytes());
    assert_eq!(reply.header("content-length"), Some("11"));
    assert_eq!(reply.header("content-type"), Some("text/plain; charset=utf-8"));
    assert!(reply.header("etag").is_some_and(|e| e.starts_with('"')));
    assert!(reply.header("last-modified").is_some_and(|d| d.ends_with(" GMT")));

    let record: serde_json::Value =
        serde_json::from_str(reply.header("x-object-record").unwrap()).unwrap();
    assert_eq!(record["key"], "a.txt");
    assert_eq!(record["size"], 11);
}

#[tokio::test]
async fn http_if_none_match_current_etag_is_not_modified() {
    let state = gateway(scenario_backend().await);
    let first = send(&state, request("GET", "/mem/test/a.txt").body(empty_body()).unwrap()).await;
    let etag = first.header("etag").unwrap().to_string();

    let reply = send(
        &state,
        request("GET", "/mem/test/a.txt")
            .header("if-none-match", etag.as_str())
            .body(empty_body())
            .unwrap(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::NOT_MODIFIED);
    assert!(reply.body.is_empty());
    assert_eq!(reply.header("etag"), Some(etag.as_str()));
}

#[tokio::test]
async fn http_if_match_mismatch_is_precondition_failed() {
    let state = gateway(scenario_backend().await);
    let reply = send(
        &state,
        request("GET", "/mem/test/a.txt")
            .header("if-match", "\"stale\"")
            .body(empty_body())
            .unwrap(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn http_head_has_length_without_body() {
    let state = gateway(scenario_backend().await);
    let reply = send(&state, request("HEAD", "/mem/test/dir/b.txt").body(empty_body()).unwrap()).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.header("content-length"), Some("5"));
    assert_eq!(reply.header("content-type"), Some("text/plain; charset=utf-8"));
    assert!(reply.body.is_empty());
}

#[tokio::test]
async fn http_put_create_only_conflicts_second_time() {
    let backend = Arc::new(MemoryBackend::new());
    let state = gateway(backend.clone());

    let create = |body: &'static str| {
        request("PUT", "/mem/test/once.txt")
            .header("if-none-match", "*")
            .body(Full::new(Bytes::from(body)))
            .unwrap()
    };
    let first = send(&state, create("first")).await;
    assert_eq!(first.status, StatusCode::CREATED);
    assert_eq!(first.json()["size"], 5);

    let second = send(&state, create("second")).await;
    assert_eq!(second.status, StatusCode::CONFLICT);
    assert_eq!(second.json()["error"], "conflict");

    let stored = backend.read("once.txt").await.unwrap().bytes().await.unwrap();
    assert_eq!(stored, Bytes::from("first"));
}

#[tokio::test]
async fn http_put_round_trips_metadata_and_content_type() {
    let state = gateway(Arc::new(MemoryBackend::new()));
    let reply = send(
        &state,
        request("PUT", "/mem/test/docs/readme")
            .header("content-type", "text/markdown")
            .header("x-object-meta-owner", "alice")
            .body(Full::new(Bytes::from("# title")))
            .unwrap(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CREATED);

    let get = send(&state, request("GET", "/mem/test/docs/readme").body(empty_body()).unwrap()).await;
    assert_eq!(get.header("content-type"), Some("text/markdown"));
    assert_eq!(get.header("x-object-meta-owner"), Some("alice"));
    assert_eq!(&get.body[..], b"# title");
}

#[tokio::test]
async fn http_zero_length_put_and_get() {
    let state = gateway(Arc::new(MemoryBackend::new()));
    let put_reply = send(&state, request("PUT", "/mem/test/empty.bin").body(empty_body()).unwrap()).await;
    assert_eq!(put_reply.status, StatusCode::CREATED);

    let get = send(&state, request("GET", "/mem/test/empty.bin").body(empty_body()).unwrap()).await;
    assert_eq!(get.status, StatusCode::OK);
    assert_eq!(get.header("content-length"), Some("0"));
    assert_eq!(get.header("content-type"), Some("application/octet-stream"));
    assert!(get.body.is_empty());
}

#[tokio::test]
async fn http_list_root_groups_directory() {
    let state = gateway(scenario_backend().await);
    let reply = send(&state, request("GET", "/mem/test/?list").body(empty_body()).unwrap()).await;
    assert_eq!(reply.status, StatusCode::OK);

    let page = reply.json();
    let keys: Vec<&str> = page["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["key"].as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["a.txt", "dir/"]);
    assert_eq!(page["entries"][1]["type"], "prefix");
    assert!(page.get("next_token").is_none());
}

#[tokio::test]
async fn http_list_pages_with_token() {
    let state = gateway(scenario_backend().await);
    let first = send(
        &state,
        request("GET", "/mem/test?list&recursive=true&limit=2").body(empty_body()).unwrap(),
    )
    .await
    .json();
    assert_eq!(first["entries"].as_array().unwrap().len(), 2);
    let token = first["next_token"].as_str().unwrap();

    let uri = format!("/mem/test?list&recursive=true&limit=2&token={}", token);
    let second = send(&state, request("GET", &uri).body(empty_body()).unwrap()).await.json();
    assert_eq!(second["entries"][0]["key"], "dir/c.txt");
    assert!(second.get("next_token").is_none());
}

#[tokio::test]
async fn http_invalid_limit_is_bad_request() {
    let state = gateway(scenario_backend().await);
    let reply = send(&state, request("GET", "/mem/test?list&limit=zero").body(empty_body()).unwrap()).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.json()["error"], "invalid_argument");
}

#[tokio::test]
async fn http_recursive_delete_removes_two() {
    let backend = scenario_backend().await;
    let state = gateway(backend.clone());

    let reply = send(&state, request("DELETE", "/mem/test/dir?recursive=true").body(empty_body()).unwrap()).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.json()["deleted"].as_array().unwrap().len(), 2);
    assert_eq!(all_keys(backend.as_ref()).await, vec!["a.txt"]);
}

#[tokio::test]
async fn http_single_delete_then_get_is_not_found() {
    let state = gateway(scenario_backend().await);
    let delete = send(&state, request("DELETE", "/mem/test/a.txt").body(empty_body()).unwrap()).await;
    assert_eq!(delete.status, StatusCode::NO_CONTENT);

    let get = send(&state, request("GET", "/mem/test/a.txt").body(empty_body()).unwrap()).await;
    assert_eq!(get.status, StatusCode::NOT_FOUND);
    assert_eq!(get.json()["error"], "not_found");

    let again = send(&state, request("DELETE", "/mem/test/a.txt").body(empty_body()).unwrap()).await;
    assert_eq!(again.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn http_unregistered_prefix_is_not_found() {
    let state = gateway(scenario_backend().await);
    let reply = send(&state, request("GET", "/s3/elsewhere/a.txt").body(empty_body()).unwrap()).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.json()["error"], "not_handled");
}

#[tokio::test]
async fn http_unsupported_method() {
    let state = gateway(scenario_backend().await);
    let reply = send(&state, request("PATCH", "/mem/test/a.txt").body(empty_body()).unwrap()).await;
    assert_eq!(reply.status, StatusCode::METHOD_NOT_ALLOWED);
    assert!(reply.header("allow").is_some());
}

#[tokio::test]
async fn http_upload_many_files_into_directory() {
    let backend = scenario_backend().await;
    let state = gateway(backend.clone());

    let reply = send(
        &state,
        request("POST", "/mem/test/dir/")
            .header("content-type", "multipart/form-data; boundary=XYZ")
            .body(form("XYZ", &[("d.txt", "delta"), ("e.txt", "echo")]))
            .unwrap(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.json().as_array().unwrap().len(), 2);
    assert_eq!(
        all_keys(backend.as_ref()).await,
        vec!["a.txt", "dir/b.txt", "dir/c.txt", "dir/d.txt", "dir/e.txt"]
    );
}

#[tokio::test]
async fn http_upload_many_files_to_object_is_rejected_up_front() {
    let backend = scenario_backend().await;
    let state = gateway(backend.clone());

    let reply = send(
        &state,
        request("POST", "/mem/test/a.txt")
            .header("content-type", "multipart/form-data; boundary=XYZ")
            .body(form("XYZ", &[("d.txt", "delta"), ("e.txt", "echo")]))
            .unwrap(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(all_keys(backend.as_ref()).await, vec!["a.txt", "dir/b.txt", "dir/c.txt"]);
}

#[tokio::test]
async fn http_upload_without_multipart_body_is_rejected() {
    let state = gateway(scenario_backend().await);
    let reply = send(
        &state,
        request("POST", "/mem/test/dir/")
            .header("content-type", "text/plain")
            .body(Full::new(Bytes::from("not a form")))
            .unwrap(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn http_streamed_upload_emits_ordered_events() {
    let backend = Arc::new(MemoryBackend::new());
    let state = gateway(backend.clone());

    let reply = send(
        &state,
        request("POST", "/mem/test/inbox/?progress=true")
            .header("content-type", "multipart/form-data; boundary=XYZ")
            .body(form("XYZ", &[("one.txt", "0123456789"), ("two.txt", "ab")]))
            .unwrap(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.header("content-type"), Some("application/x-ndjson"));

    let events: Vec<serde_json::Value> = std::str::from_utf8(&reply.body)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();

    assert_eq!(types.first(), Some(&"start"));
    assert_eq!(events[0]["files"], 2);
    assert_eq!(events[0]["bytes"], 12);
    assert_eq!(types.last(), Some(&"done"));
    assert_eq!(types.iter().filter(|t| **t == "complete").count(), 2);
    assert!(types.iter().filter(|t| **t == "progress").count() >= 3);
    assert_eq!(
        all_keys(backend.as_ref()).await,
        vec!["inbox/one.txt", "inbox/two.txt"]
    );
}

#[tokio::test]
async fn http_health_lists_backends() {
    let state = gateway(scenario_backend().await);
    let reply = send(&state, request("GET", "/health").body(empty_body()).unwrap()).await;
    assert_eq!(reply.status, StatusCode::OK);
    let health = reply.json();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["backends"][0]["name"], "test");
    assert_eq!(health["backends"][0]["kind"], "memory");
}

#[tokio::test]
async fn http_sniffed_type_precedes_extension() {
    let backend = Arc::new(MemoryBackend::new());
    put(backend.as_ref(), "x/y.json", "{}").await;
    let state = gateway(backend as Arc<dyn StorageBackend>);
    let reply = send(&state, request("GET", "/mem/test/x/y.json").body(empty_body()).unwrap()).await;
    assert_eq!(reply.header("content-type"), Some("text/plain; charset=utf-8"));
}

#[tokio::test]
async fn http_streamed_upload_failure_rolls_back_and_ends_with_error() {
    let backend = Arc::new(RefusingWrites {
        refused: "locked.txt".to_string(),
        ..Default::default()
    });
    put(backend.as_ref(), "inbox/keep.txt", "keep").await;
    let state = gateway(backend.clone());

    let reply = send(
        &state,
        request("POST", "/mem/test/inbox/?progress=true")
            .header("content-type", "multipart/form-data; boundary=XYZ")
            .body(form("XYZ", &[("one.txt", "0123456789"), ("locked.txt", "ab")]))
            .unwrap(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);

    let events: Vec<serde_json::Value> = std::str::from_utf8(&reply.body)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();

    assert_eq!(types.first(), Some(&"start"));
    assert_eq!(types.iter().filter(|t| **t == "complete").count(), 1);
    assert_eq!(types.iter().filter(|t| **t == "error").count(), 1);
    assert_eq!(types.last(), Some(&"error"));
    assert!(!types.contains(&"done"));
    assert_eq!(events.last().unwrap()["status"], 403);

    assert_eq!(all_keys(backend.as_ref()).await, vec!["inbox/keep.txt"]);
}
