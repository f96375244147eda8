//! Conditional request evaluation for GET and HEAD.
//!
//! Precedence: `If-Match` (strong comparison) or, when absent,
//! `If-Unmodified-Since` can fail the request with 412. Then `If-None-Match`
//! (weak comparison) or, when absent, `If-Modified-Since` can short-circuit
//! it with 304. The first decisive check wins.

use chrono::{DateTime, Utc};
use hyper::header::{
    HeaderMap, IF_MATCH, IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_UNMODIFIED_SINCE,
};

use crate::storage::ObjectRecord;

/// Result of evaluating the conditional headers of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Proceed,
    NotModified,
    PreconditionFailed,
}

pub fn evaluate(headers: &HeaderMap, record: &ObjectRecord) -> Outcome {
    let current = record.e_tag.as_deref().map(opaque_tag);
    let modified = truncate_to_seconds(record.last_modified);

    if let Some(if_match) = header_str(headers, IF_MATCH) {
        if !tag_list_matches(if_match, current, true) {
            return Outcome::PreconditionFailed;
        }
    } else if let Some(since) = header_date(headers, IF_UNMODIFIED_SINCE) {
        if modified > since {
            return Outcome::PreconditionFailed;
        }
    }

    if let Some(if_none_match) = header_str(headers, IF_NONE_MATCH) {
        if tag_list_matches(if_none_match, current, false) {
            return Outcome::NotModified;
        }
    } else if let Some(since) = header_date(headers, IF_MODIFIED_SINCE) {
        if modified <= since {
            return Outcome::NotModified;
        }
    }

    Outcome::Proceed
}

/// Format a timestamp as an IMF-fixdate.
pub fn http_date(ts: DateTime<Utc>) -> String {
    ts.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Entity tag as sent on the wire, always quoted.
pub fn quoted_etag(e_tag: &str) -> String {
    if e_tag.starts_with('"') || e_tag.starts_with("W/\"") {
        e_tag.to_string()
    } else {
        format!("\"{}\"", e_tag)
    }
}

fn header_str(headers: &HeaderMap, name: hyper::header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn header_date(headers: &HeaderMap, name: hyper::header::HeaderName) -> Option<DateTime<Utc>> {
    header_str(headers, name).and_then(parse_http_date)
}

fn truncate_to_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(ts.timestamp(), 0).unwrap_or(ts)
}

/// Tag value without weakness marker or quotes.
fn opaque_tag(tag: &str) -> &str {
    tag.trim()
        .trim_start_matches("W/")
        .trim_matches('"')
}

fn tag_list_matches(list: &str, current: Option<&str>, strong: bool) -> bool {
    let Some(current) = current else {
        return false;
    };
    list.split(',').map(str::trim).any(|candidate| {
        if candidate == "*" {
            return true;
        }
        if strong && candidate.starts_with("W/") {
            return false;
        }
        opaque_tag(candidate) == current
    })
}
