//! Cache key derivation
//!
//! A key is the namespace prefix followed by the table and the canonical query
//! string: parameters sorted by name and percent-encoded, so `?b=2&a=1` and
//! `?a=1&b=2` address the same entry.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use crate::CacheError;

/// Canonical query parameter set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParams(BTreeMap<String, String>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw query string (no leading `?`).
    ///
    /// Repeated names keep the last value. `+` decodes to a space.
    pub fn parse(query: &str) -> Result<Self, CacheError> {
        let mut params = BTreeMap::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            let name = decode(name)?;
            if name.is_empty() {
                continue;
            }
            params.insert(name, decode(value)?);
        }
        Ok(Self(params))
    }

    /// Add or replace a parameter
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Add or replace a parameter in place
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    /// Set `limit` when the query carries none
    pub fn with_default_limit(mut self, limit: u32) -> Self {
        self.0
            .entry("limit".to_owned())
            .or_insert_with(|| limit.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|s| s.as_str())
    }

    /// The `id` parameter, when the query addresses a single record
    pub fn id(&self) -> Option<&str> {
        self.get("id").filter(|id| !id.is_empty())
    }

    /// Page size; unparseable values are ignored
    pub fn limit(&self) -> Option<u32> {
        self.get("limit").and_then(|v| v.parse().ok())
    }

    /// Page offset; unparseable values are ignored
    pub fn offset(&self) -> Option<u32> {
        self.get("offset").and_then(|v| v.parse().ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sorted, percent-encoded `name=value&...` form
    pub fn canonical(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn decode(raw: &str) -> Result<String, CacheError> {
    let spaced: Cow<'_, str> = if raw.contains('+') {
        Cow::Owned(raw.replace('+', " "))
    } else {
        Cow::Borrowed(raw)
    };
    urlencoding::decode(&spaced)
        .map(Cow::into_owned)
        .map_err(|e| CacheError::Validation(format!("bad percent-encoding in '{}': {}", raw, e)))
}

/// Normalized key addressing one cached result set
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Namespace a caller-supplied key. Already-prefixed keys are kept as is.
    pub fn new(prefix: &str, raw: &str) -> Self {
        if raw.starts_with(prefix) {
            Self(raw.to_owned())
        } else {
            Self(format!("{}{}", prefix, raw))
        }
    }

    /// Key for a table query
    pub fn for_query(prefix: &str, table: &str, params: &QueryParams) -> Self {
        if params.is_empty() {
            Self(format!("{}{}", prefix, table))
        } else {
            Self(format!("{}{}?{}", prefix, table, params.canonical()))
        }
    }

    /// Rebuild a key read back from the fast cache
    pub(crate) fn from_raw(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Table and parameters addressed by a request URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    pub table: String,
    pub params: QueryParams,
}

impl RequestTarget {
    /// Parse an absolute URL or a path with query.
    ///
    /// The table is the first path segment after any leading `api` and version
    /// (`v1`, `v2`, ...) segments. Listing defaults apply to `limit`.
    pub fn from_url(url: &str, default_limit: u32) -> Result<Self, CacheError> {
        let without_fragment = url.split('#').next().unwrap_or(url);
        let (location, query) = without_fragment
            .split_once('?')
            .unwrap_or((without_fragment, ""));

        // Drop scheme and authority, keep the path
        let path = match location.split_once("://") {
            Some((_, rest)) => rest.find('/').map_or("", |idx| &rest[idx..]),
            None => location,
        };

        let table = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .find(|segment| !is_routing_segment(segment))
            .ok_or_else(|| CacheError::Validation(format!("no table in url '{}'", url)))?;

        Ok(Self {
            table: decode(table)?,
            params: QueryParams::parse(query)?.with_default_limit(default_limit),
        })
    }

    /// Namespaced cache key for this target
    pub fn cache_key(&self, prefix: &str) -> CacheKey {
        CacheKey::for_query(prefix, &self.table, &self.params)
    }
}

fn is_routing_segment(segment: &str) -> bool {
    if segment.eq_ignore_ascii_case("api") {
        return true;
    }
    segment
        .strip_prefix(['v', 'V'])
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
}
