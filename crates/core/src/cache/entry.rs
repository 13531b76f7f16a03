//! Cached response types shared by both cache tiers.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordered header list.
///
/// Names keep the casing they arrived with and lookups ignore ASCII case.
/// Insertion order and repeated names are preserved so a cached response
/// re-serializes exactly as it was received.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// First value recorded for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Append a value, keeping any existing ones.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Replace every value for `name` with a single one.
    ///
    /// The first existing occurrence keeps its position; a new name goes last.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter().position(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            Some(idx) => {
                self.0[idx].1 = value;
                let mut seen = 0usize;
                self.0.retain(|(k, _)| {
                    if k.eq_ignore_ascii_case(&name) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => self.0.push((name, value)),
        }
    }

    /// Remove every value for `name`, returning how many were dropped.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.0.len();
        self.0.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        before - self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Serialize as a JSON array of `[name, value]` pairs.
    pub fn to_json(&self) -> Result<String, crate::Error> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, crate::Error> {
        Ok(serde_json::from_str(json)?)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A cached origin response.
///
/// Both tiers hold their own copy; nothing is shared between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Exact request URL, no normalization.
    pub key: String,
    pub content: Bytes,
    pub headers: Headers,
    pub status_code: u16,
    /// Body length declared at write time.
    pub expected_size: u64,
    /// When the entry was committed.
    pub timestamp: DateTime<Utc>,
}

impl CacheEntry {
    /// Whether stored content matches the size declared at write time.
    pub fn is_intact(&self) -> bool {
        self.content.len() as u64 == self.expected_size
    }
}

/// A pending durable write, owned by the write queue until committed.
#[derive(Debug, Clone)]
pub struct WriteTask {
    pub key: String,
    pub content: Bytes,
    pub headers: Headers,
    pub status_code: u16,
    pub expected_size: u64,
}

impl WriteTask {
    /// Build a task, taking `expected_size` from `Content-Length` when it
    /// parses and from the body length otherwise.
    pub fn new(key: impl Into<String>, content: Bytes, headers: Headers, status_code: u16) -> Self {
        let expected_size = headers
            .get("Content-Length")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(content.len() as u64);
        Self { key: key.into(), content, headers, status_code, expected_size }
    }
}
