//! Chunk sizing and byte-range headers

use crate::error::Error;
use crate::Result;

/// Chunk sizes must be a multiple of 256 KiB
pub const CHUNK_ALIGNMENT: u64 = 262_144;

/// 10 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 10_485_760;

/// Reject chunk sizes the storage backend cannot honour
pub fn validate_chunk_size(chunk_size: u64) -> Result<()> {
    if chunk_size == 0 || chunk_size % CHUNK_ALIGNMENT != 0 {
        return Err(Error::invalid_request(format!(
            "chunk_size should be a positive multiple of 256 KiB, got {chunk_size}"
        )));
    }
    Ok(())
}

/// `Range` request header for `len` bytes starting at `start`
pub fn range_header(start: u64, len: u64) -> String {
    format!("bytes={}-{}", start, start + len.saturating_sub(1))
}

/// Parsed `Content-Range` response header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// Inclusive byte span, absent for `bytes */total`
    pub span: Option<(u64, u64)>,
    pub total: Option<u64>,
}

impl ContentRange {
    /// Parse `bytes a-b/total`, `bytes a-b/*` or `bytes */total`
    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.trim().strip_prefix("bytes")?.trim_start();
        let (span, total) = rest.split_once('/')?;

        let total = match total.trim() {
            "*" => None,
            t => Some(t.parse().ok()?),
        };

        let span = match span.trim() {
            "*" => None,
            s => {
                let (start, end) = s.split_once('-')?;
                let start: u64 = start.trim().parse().ok()?;
                let end: u64 = end.trim().parse().ok()?;
                if end < start {
                    return None;
                }
                Some((start, end))
            }
        };

        Some(Self { span, total })
    }

    pub fn start(&self) -> Option<u64> {
        self.span.map(|(start, _)| start)
    }

    /// Number of bytes covered by the span
    pub fn len(&self) -> u64 {
        self.span.map_or(0, |(start, end)| end - start + 1)
    }

    pub fn is_empty(&self) -> bool {
        self.span.is_none()
    }
}

/// Bytes persisted so far according to a `range: bytes=0-N` header
pub fn persisted_bytes(range: Option<&str>) -> Result<u64> {
    let Some(range) = range else {
        return Ok(0);
    };
    let end = range
        .trim()
        .strip_prefix("bytes=")
        .and_then(|r| r.split_once('-'))
        .filter(|(start, _)| start.trim() == "0")
        .and_then(|(_, end)| end.trim().parse::<u64>().ok())
        .ok_or_else(|| Error::InvalidResponse {
            message: format!("Unexpected range header {range:?}"),
            status_code: Some(308),
        })?;
    Ok(end + 1)
}
