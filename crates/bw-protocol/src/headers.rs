//! Header map with reserved key constants

use serde::{Deserialize, Serialize};
use std::collections::hash_map::{self, HashMap};

use crate::error::ProtocolError;

/// Header names with protocol meaning
pub mod header {
    /// Correlation id linking a response to its request
    pub const CORRELATION_ID: &str = "id";
    /// Command carrier used by the text framing
    pub const COMMAND: &str = "cmd";
    /// Body length used by the text framing
    pub const CONTENT_LENGTH: &str = "content-length";
    /// Millisecond timestamp stamped on heartbeats
    pub const TIMESTAMP: &str = "timestamp";
    /// Content type of the body, when the sender sets one
    pub const CONTENT_TYPE: &str = "content-type";
}

/// Message headers
///
/// Keys are unique and case-insensitive: they are stored lowercased, so
/// `Content-Type` and `content-type` name the same entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "HashMap<String, String>", into = "HashMap<String, String>")]
pub struct Headers {
    entries: HashMap<String, String>,
}

impl Headers {
    /// Create an empty header map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, returning the previous value for that key
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) -> Option<String> {
        self.entries
            .insert(key.as_ref().to_ascii_lowercase(), value.into())
    }

    /// Get a header value
    pub fn get(&self, key: &str) -> Option<&str> {
        match self.entries.get(key) {
            Some(value) => Some(value.as_str()),
            None if key.bytes().any(|b| b.is_ascii_uppercase()) => self
                .entries
                .get(&key.to_ascii_lowercase())
                .map(String::as_str),
            None => None,
        }
    }

    /// Remove a header, returning its value
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(&key.to_ascii_lowercase())
    }

    /// Check whether a header is present
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of headers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if there are no headers
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(key, value)` pairs in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Check every key and value can be carried by a line-based framing
    pub fn validate(&self) -> Result<(), ProtocolError> {
        for (key, value) in &self.entries {
            if !is_token(key) {
                return Err(ProtocolError::InvalidHeaderName(key.clone()));
            }
            if value.contains(['\r', '\n']) {
                return Err(ProtocolError::InvalidHeaderValue { name: key.clone() });
            }
        }
        Ok(())
    }
}

/// A token is non-empty visible ASCII without separators used by the framing
pub(crate) fn is_token(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_graphic() && b != b':')
}

impl From<HashMap<String, String>> for Headers {
    fn from(map: HashMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl From<Headers> for HashMap<String, String> {
    fn from(headers: Headers) -> Self {
        headers.entries
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

impl IntoIterator for Headers {
    type Item = (String, String);
    type IntoIter = hash_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
