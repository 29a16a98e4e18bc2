//! Content transfer between local streams and the platform
//!
//! Three paths exist for each direction: through the API content endpoint,
//! through a single signed URL, and resumable over a sequence of signed URLs.

pub mod chunk;
pub mod download;
pub mod upload;

pub use chunk::{validate_chunk_size, ContentRange, CHUNK_ALIGNMENT, DEFAULT_CHUNK_SIZE};
pub use download::{
    download_api, download_direct, download_resumable, ChunkEvent, DownloadMachine, DownloadState,
    RefreshLimits, ResumableDownload, UrlSource,
};
pub use upload::{upload_api, upload_resumable, ResumableUpload};
