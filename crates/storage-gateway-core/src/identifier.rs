//! Object identifiers.
//!
//! Every object or prefix the gateway serves is addressed as
//! `scheme://host/path[?query]`. An [`Identifier`] is the canonical form:
//! the path uses forward-slash segments, has no leading slash, and keeps a
//! trailing slash when one was given (it marks an explicit prefix).

use percent_encoding::percent_decode_str;
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Key returned by [`Identifier::relative_key`] for the root of a backend.
pub const ROOT_KEY: &str = "/";

/// Canonical object identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    scheme: String,
    host: String,
    path: String,
}

impl Identifier {
    /// Parse a raw identifier. Does not check that any backend serves it.
    pub fn resolve(raw: &str) -> Result<Self> {
        let malformed = |message: &str| Error::MalformedIdentifier {
            identifier: raw.to_string(),
            message: message.to_string(),
        };

        let parsed = url::Url::parse(raw).map_err(|e| malformed(&e.to_string()))?;
        if parsed.cannot_be_a_base() {
            return Err(malformed("expected scheme://host/path"));
        }

        let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
        let decoded = percent_decode_str(parsed.path())
            .decode_utf8()
            .map_err(|_| malformed("path is not valid UTF-8"))?;

        Ok(Self {
            scheme: parsed.scheme().to_ascii_lowercase(),
            host,
            path: normalize_path(&decoded),
        })
    }

    /// Build an identifier from already separated parts.
    pub fn from_parts(scheme: &str, host: &str, path: &str) -> Result<Self> {
        if scheme.is_empty()
            || !scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Err(Error::MalformedIdentifier {
                identifier: format!("{}://{}/{}", scheme, host, path),
                message: "invalid scheme".to_string(),
            });
        }
        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            path: normalize_path(path),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Normalized path (no leading slash).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Identifier for `key` underneath this one, treating `self` as a prefix.
    pub fn join(&self, key: &str) -> Self {
        let base = self.path.trim_end_matches('/');
        let key = key.trim_start_matches('/');
        let path = match (base.is_empty(), key.is_empty()) {
            (true, _) => key.to_string(),
            (false, true) => format!("{}/", base),
            (false, false) => format!("{}/{}", base, key),
        };
        Self {
            scheme: self.scheme.clone(),
            host: self.host.clone(),
            path: normalize_path(&path),
        }
    }

    /// Backend-relative key of `self` under the backend prefix `prefix`.
    ///
    /// Returns `None` when scheme or host differ or when the path is not
    /// under the prefix path (segment-wise). Returns `Some("/")` when the path
    /// equals the prefix, with or without a trailing slash.
    pub fn relative_key(&self, prefix: &Identifier) -> Option<String> {
        if self.scheme != prefix.scheme || self.host != prefix.host {
            return None;
        }

        let base = prefix.path.trim_end_matches('/');
        if base.is_empty() {
            return Some(if self.path.is_empty() {
                ROOT_KEY.to_string()
            } else {
                self.path.clone()
            });
        }

        let rest = self.path.strip_prefix(base)?;
        if rest.is_empty() || rest == "/" {
            return Some(ROOT_KEY.to_string());
        }
        rest.strip_prefix('/').map(str::to_string)
    }
}

impl FromStr for Identifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::resolve(s)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.host, self.path)
    }
}

/// Convert a relative key into the key a driver expects (root becomes "").
pub fn driver_key(relative: &str) -> &str {
    if relative == ROOT_KEY {
        ""
    } else {
        relative
    }
}

/// Collapse separators, drop the leading slash and `.` segments, keep a trailing slash.
fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let trailing = path.ends_with('/');
    let segments: Vec<&str> = path
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    let mut out = segments.join("/");
    if trailing && !out.is_empty() {
        out.push('/');
    }
    out
}

/// Whether `key` contains a `..` segment.
pub fn has_parent_segment(key: &str) -> bool {
    key.split('/').any(|s| s == "..")
}
