//! URL construction for API endpoints
//!
//! Every path segment (and the prefix) is percent-encoded on its own, with no
//! safe characters, so `/` inside an id never splits the path.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::Error;
use crate::Result;

/// Everything except the RFC 3986 unreserved set
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encode a single path segment
pub fn quote(segment: &str) -> String {
    utf8_percent_encode(segment, SEGMENT).to_string()
}

/// Builds endpoint URLs from a base host and optional prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlBuilder {
    base_url: String,
    prefix: String,
}

impl UrlBuilder {
    pub fn new(base_url: impl Into<String>, prefix: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            prefix: prefix.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Join `segments` onto the base URL; an empty path is rejected.
    pub fn build<S: AsRef<str>>(&self, segments: &[S]) -> Result<String> {
        if segments.is_empty() {
            return Err(Error::invalid_request("Request path must not be empty"));
        }

        let mut url = self.base_url.clone();
        if !self.prefix.is_empty() {
            url.push('/');
            url.push_str(&quote(&self.prefix));
        }
        for segment in segments {
            url.push('/');
            url.push_str(&quote(segment.as_ref()));
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_characters_are_encoded() {
        let builder = UrlBuilder::new("https://host", "[platapi");
        let url = builder
            .build(&["re$ource", "12/%&52*", "c@ntent"])
            .unwrap();
        assert_eq!(
            url,
            "https://host/%5Bplatapi/re%24ource/12%2F%25%2652%2A/c%40ntent"
        );
    }

    #[test]
    fn test_empty_prefix_is_skipped() {
        let builder = UrlBuilder::new("https://host/", "");
        assert_eq!(
            builder.build(&["datasets", "ds_1"]).unwrap(),
            "https://host/datasets/ds_1"
        );
    }

    #[test]
    fn test_empty_path_is_rejected() {
        let builder = UrlBuilder::new("https://host", "plat-api");
        let empty: [&str; 0] = [];
        assert!(matches!(
            builder.build(&empty),
            Err(Error::InvalidRequest { .. })
        ));
    }

    #[test]
    fn test_unreserved_characters_stay_literal() {
        assert_eq!(quote("a-b.c_d~e"), "a-b.c_d~e");
        assert_eq!(quote("file name.csv"), "file%20name.csv");
        assert_eq!(quote("ünï"), "%C3%BCn%C3%AF");
    }
}
