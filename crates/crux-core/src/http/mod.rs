//! Request dispatch for the platform API
//!
//! This module provides:
//! - URL construction with per-segment percent-encoding
//! - Bearer authentication and user agent headers
//! - Retry logic with exponential backoff
//! - Response classification and cursor pagination

pub mod auth;
pub mod builder;
pub mod client;
pub mod paginate;
pub mod response;
pub mod retry;

pub use auth::{AuthHandler, BearerAuth};
pub use builder::{quote, UrlBuilder};
pub use client::{ApiRequest, Client};
pub use paginate::{Paginator, DEFAULT_PAGE_SIZE};
pub use response::{Dispatched, Outcome, Pagination, ResponseShape};
pub use retry::{RetryDecision, RetryPolicy};
