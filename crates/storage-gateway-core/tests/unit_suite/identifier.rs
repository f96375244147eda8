//! Identifier resolution tests.
//!
//! - Relative keys under nested prefixes
//! - Idempotence of re-resolving a joined identifier
//! - Query strings are dropped

use storage_gateway_core::identifier::ROOT_KEY;
use storage_gateway_core::{Error, Identifier};

fn id(raw: &str) -> Identifier {
    Identifier::resolve(raw).expect("identifier should parse")
}

#[test]
fn identifier_query_is_discarded() {
    let with_query = id("s3://media/photos/a.jpg?versionId=7&x=1");
    assert_eq!(with_query, id("s3://media/photos/a.jpg"));
}

#[test]
fn identifier_relative_key_is_none_outside_prefix() {
    let prefix = id("s3://media/photos/");
    for outside in [
        "s3://media/photo/a.jpg",
        "s3://media/photos-old/a.jpg",
        "s3://media2/photos/a.jpg",
        "file:///photos/a.jpg",
    ] {
        assert_eq!(id(outside).relative_key(&prefix), None, "{}", outside);
    }
}

#[test]
fn identifier_relative_key_round_trips() {
    let prefix = id("s3://media/photos/");
    for inside in [
        "s3://media/photos/a.jpg",
        "s3://media/photos/2024/01/b.jpg",
        "s3://media/photos/2024/",
    ] {
        let original = id(inside);
        let key = original.relative_key(&prefix).expect("inside prefix");
        let again = prefix.join(&key).relative_key(&prefix);
        assert_eq!(again.as_deref(), Some(key.as_str()), "{}", inside);
    }
}

#[test]
fn identifier_prefix_itself_is_root() {
    let prefix = id("mem://scratch/area");
    assert_eq!(id("mem://scratch/area/").relative_key(&prefix).as_deref(), Some(ROOT_KEY));
}

#[test]
fn identifier_parse_from_str() {
    let parsed: Identifier = "mem://scratch/a/b".parse().unwrap();
    assert_eq!(parsed.to_string(), "mem://scratch/a/b");
    assert!(matches!(
        "::".parse::<Identifier>(),
        Err(Error::MalformedIdentifier { .. })
    ));
}
