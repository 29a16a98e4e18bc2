//! Case-insensitive header map
//!
//! Keys are folded to lower case on every write, so `Content-Type` followed by
//! `content-type` leaves exactly one entry holding the second value.

use std::collections::BTreeMap;

/// Header map with lower-cased keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    inner: BTreeMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// `content-type` and `accept` set to `application/json`
    pub fn json() -> Self {
        Self::new()
            .with("content-type", "application/json")
            .with("accept", "application/json")
    }

    /// Insert a header, returning the previous value for the folded key
    pub fn set(&mut self, key: impl AsRef<str>, value: impl Into<String>) -> Option<String> {
        self.inner
            .insert(key.as_ref().to_ascii_lowercase(), value.into())
    }

    /// Builder-style [`Headers::set`]
    pub fn with(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner
            .get(&key.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(&key.to_ascii_lowercase())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.inner.remove(&key.to_ascii_lowercase())
    }

    /// Copy every entry of `other` into `self`; entries of `other` win.
    pub fn merge(&mut self, other: &Headers) {
        for (key, value) in &other.inner {
            self.inner.insert(key.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (key, value) in iter {
            headers.set(key, value);
        }
        headers
    }
}

impl<K: AsRef<str>, V: Into<String>> Extend<(K, V)> for Headers {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.set(key, value);
        }
    }
}
