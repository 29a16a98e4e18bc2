//! Crux Core - request dispatch and resumable transfers for the Crux data platform
//!
//! This crate talks to the platform REST API and to the storage URLs it hands
//! out. Everything is blocking; run independent transfers on separate threads
//! if you need parallelism.
//!
//! # Main Components
//!
//! - **Transport**: a single-request abstraction with a reqwest implementation
//! - **Dispatcher**: URL encoding, auth headers, retry and response classification
//! - **Signed URLs**: download URLs and upload sessions issued by the API
//! - **Transfers**: direct, API and resumable download/upload paths
//!
//! # Example
//!
//! ```no_run
//! use crux_core::{Client, ClientConfig, Result};
//! use crux_core::transfer::{download_resumable, DEFAULT_CHUNK_SIZE};
//!
//! fn example() -> Result<()> {
//!     let client = Client::new(ClientConfig::from_env()?)?;
//!     let mut sink = Vec::new();
//!     download_resumable(&client, "resource-id", &mut sink, DEFAULT_CHUNK_SIZE)?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod headers;
pub mod http;
pub mod signed_url;
pub mod transfer;
pub mod transport;

// Re-export main types for convenience
pub use config::ClientConfig;
pub use error::{ApiErrorBody, Error, ExhaustionReason, Result, TimeoutPhase};
pub use headers::Headers;
pub use http::{ApiRequest, Client, Dispatched, Outcome, Pagination, Paginator, RetryPolicy};
pub use signed_url::{SignedUrlResolver, UploadSession};
pub use transport::{Method, Timeouts, Transport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
