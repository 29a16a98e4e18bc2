//! Error types for the Crux client
//!
//! Every failure surfaced by this crate is one of the variants below. Transport
//! failures are translated at the dispatch boundary, so callers never see a
//! `reqwest` error type.

use std::fmt;

use serde_json::Value;
use thiserror::Error;

use crate::transport::TransportError;

/// Main error type for Crux client operations
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed call, rejected before any I/O
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// TLS, proxy or socket level failure
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Connect or read timeout exceeded
    #[error("Timeout ({phase}): {message}")]
    Timeout { message: String, phase: TimeoutPhase },

    /// Redirect limit exceeded
    #[error("Too many redirects: {message}")]
    TooManyRedirects { message: String },

    /// Generic HTTP level failure reported by the transport
    #[error("HTTP error: {message}")]
    Http {
        message: String,
        status_code: Option<u16>,
    },

    /// The API answered 404
    #[error("Resource not found: {0}")]
    NotFound(ApiErrorBody),

    /// The API answered with any other non-success status
    #[error("API error: {0}")]
    Api(ApiErrorBody),

    /// A signed-URL response lacked a field the backend promised
    #[error("Signed URL response for resource {resource_id} is missing `{field}`")]
    SignedUrlContract {
        resource_id: String,
        field: &'static str,
    },

    /// The resumable engine ran out of signed-URL refreshes
    #[error("Transfer of resource {resource_id} failed: {reason} ({refreshes} refreshes)")]
    TransferExhausted {
        resource_id: String,
        reason: ExhaustionReason,
        refreshes: u32,
    },

    /// Bytes received do not line up with what was requested
    #[error("Data corruption: {message}")]
    DataCorruption { message: String },

    /// Storage backend violated the resumable upload protocol
    #[error("Invalid response from storage: {message}")]
    InvalidResponse {
        message: String,
        status_code: Option<u16>,
    },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// JSON parsing and serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    /// IO errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience type alias for Results using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether an application-level retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Connection { .. } | Error::Timeout { .. })
    }

    /// Status code reported by the API, if this error came from a response
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::NotFound(body) | Error::Api(body) => Some(body.http_status),
            Error::Http { status_code, .. } | Error::InvalidResponse { status_code, .. } => {
                *status_code
            }
            _ => None,
        }
    }

    pub(crate) fn invalid_request(message: impl Into<String>) -> Self {
        Error::InvalidRequest {
            message: message.into(),
        }
    }
}

/// Which phase of a request hit its deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    Connect,
    Read,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutPhase::Connect => write!(f, "connect"),
            TimeoutPhase::Read => write!(f, "read"),
        }
    }
}

/// Why a resumable transfer gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionReason {
    /// Absolute cap on signed-URL refetches reached
    MaxRefreshes,
    /// Too many consecutive refetches without a single new byte
    NoProgress,
}

impl fmt::Display for ExhaustionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExhaustionReason::MaxRefreshes => write!(f, "exceeded max new signed URLs"),
            ExhaustionReason::NoProgress => {
                write!(f, "exceeded max new signed URLs without progress")
            }
        }
    }
}

/// Parsed error payload returned by the API
#[derive(Debug, Clone, PartialEq)]
pub struct ApiErrorBody {
    /// HTTP status of the response
    pub http_status: u16,
    /// Status reported inside the body (`statusCode`, or `status` on newer endpoints)
    pub status_code: Option<i64>,
    /// Raw body; non-JSON bodies are kept as a string value
    pub body: Value,
}

impl ApiErrorBody {
    /// Build from a status and the raw response bytes
    pub fn from_bytes(http_status: u16, bytes: &[u8]) -> Self {
        let body = serde_json::from_slice::<Value>(bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()));
        Self::new(http_status, body)
    }

    pub fn new(http_status: u16, body: Value) -> Self {
        let status_code = body
            .get("statusCode")
            .or_else(|| body.get("status"))
            .and_then(Value::as_i64);
        Self {
            http_status,
            status_code,
            body,
        }
    }

    /// Human readable message, when the backend supplied one
    pub fn message(&self) -> Option<&str> {
        self.body
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| self.body.as_str())
    }
}

impl fmt::Display for ApiErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.http_status, self.body)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<std::io::Error> for Error {
    /// Transport failures raised while reading a streamed body travel inside
    /// an `io::Error`; they keep their transport classification.
    fn from(err: std::io::Error) -> Self {
        if let Some(transport) = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<TransportError>())
        {
            return transport.clone().into();
        }
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}
