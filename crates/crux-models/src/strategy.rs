//! Transfer path selection
//!
//! Content can move through the API content endpoint, a single signed URL, or
//! a resumable sequence of signed URLs. [`TransferPolicy`] picks one from the
//! payload size, the chunk size and the first-party-domain flag.

use crux_core::transfer::{validate_chunk_size, DEFAULT_CHUNK_SIZE};
use crux_core::Result;

/// How a download will be carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadPath {
    /// No content; the sink stays empty
    Empty,
    /// Streamed from `resources/{id}/content`
    Api,
    /// One streaming GET against a signed URL
    DirectSignedUrl,
    /// Ranged GETs with signed-URL refresh
    ResumableSignedUrl,
}

/// How an upload will be carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPath {
    /// One PUT to `resources/{id}/content`
    Api,
    /// Upload session against a signed storage URL
    ResumableSignedUrl,
}

/// Knobs for a single transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPolicy {
    /// Bytes per request; a multiple of 256 KiB
    pub chunk_size: u64,
    /// Payloads below this size skip the resumable path. Defaults to twice the
    /// chunk size.
    pub threshold: Option<u64>,
    /// Overrides the client's `only_use_crux_domains` setting when set
    pub only_use_crux_domains: Option<bool>,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            threshold: None,
            only_use_crux_domains: None,
        }
    }
}

impl TransferPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn with_only_use_crux_domains(mut self, only: bool) -> Self {
        self.only_use_crux_domains = Some(only);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_chunk_size(self.chunk_size)
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
            .unwrap_or_else(|| self.chunk_size.saturating_mul(2))
    }

    /// Whether content must stay on first-party domains
    pub fn crux_only(&self, client_default: bool) -> bool {
        self.only_use_crux_domains.unwrap_or(client_default)
    }

    /// Path for downloading `size` bytes; `None` means no content was ever uploaded
    pub fn download_path(&self, size: Option<u64>, client_default: bool) -> DownloadPath {
        match size {
            None | Some(0) => DownloadPath::Empty,
            _ if self.crux_only(client_default) => DownloadPath::Api,
            Some(size) if size < self.threshold() => DownloadPath::DirectSignedUrl,
            Some(_) => DownloadPath::ResumableSignedUrl,
        }
    }

    /// Path for uploading `size` bytes
    pub fn upload_path(&self, size: u64, client_default: bool) -> UploadPath {
        if self.crux_only(client_default) || size < self.threshold() {
            UploadPath::Api
        } else {
            UploadPath::ResumableSignedUrl
        }
    }
}
