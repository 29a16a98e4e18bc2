//! Thin HTTP transport abstraction
//!
//! A [`Transport`] performs exactly one request and reports failures as
//! [`TransportError`]. Retries, auth and response classification live above
//! this layer, in [`Session`] and the dispatcher.

use std::fmt;
use std::io::{Cursor, Read};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::error::{Error, TimeoutPhase};
use crate::headers::Headers;

mod blocking;
mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod scripted;

pub use blocking::{ReqwestTransport, TransportConfig};
pub use session::Session;

/// HTTP methods accepted by the platform API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
    Post,
    Delete,
}

impl Method {
    /// Parse a method name; anything outside GET/PUT/POST/DELETE is rejected.
    pub fn parse(method: &str) -> crate::Result<Self> {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "PUT" => Ok(Method::Put),
            "POST" => Ok(Method::Post),
            "DELETE" => Ok(Method::Delete),
            _ => Err(Error::invalid_request(format!(
                "Request method should be one of GET, DELETE, PUT, POST, got {method}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request deadlines.
///
/// `read` bounds inactivity: it is the longest wait for the response head or
/// for the next piece of the body, not a deadline for the whole exchange.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(9_500),
            read: Duration::from_secs(60),
        }
    }
}

/// Request payload
#[derive(Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
    Bytes(Vec<u8>),
    /// One-shot body; a request carrying it cannot be replayed
    Stream {
        reader: Box<dyn Read + Send>,
        length: Option<u64>,
    },
}

impl RequestBody {
    /// Clone the body if it can be sent again
    pub fn try_clone(&self) -> Option<Self> {
        match self {
            RequestBody::Empty => Some(RequestBody::Empty),
            RequestBody::Json(value) => Some(RequestBody::Json(value.clone())),
            RequestBody::Form(pairs) => Some(RequestBody::Form(pairs.clone())),
            RequestBody::Bytes(bytes) => Some(RequestBody::Bytes(bytes.clone())),
            RequestBody::Stream { .. } => None,
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => write!(f, "Empty"),
            RequestBody::Json(value) => write!(f, "Json({value})"),
            RequestBody::Form(pairs) => write!(f, "Form({pairs:?})"),
            RequestBody::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            RequestBody::Stream { length, .. } => write!(f, "Stream(length: {length:?})"),
        }
    }
}

/// A fully resolved request, ready for the wire
#[derive(Debug)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
    pub stream: bool,
    pub timeouts: Timeouts,
}

impl TransportRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            query: Vec::new(),
            body: RequestBody::Empty,
            stream: false,
            timeouts: Timeouts::default(),
        }
    }

    pub fn header(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.set(key, value);
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Clone the request if its body is replayable
    pub fn try_clone(&self) -> Option<Self> {
        Some(Self {
            method: self.method,
            url: self.url.clone(),
            headers: self.headers.clone(),
            query: self.query.clone(),
            body: self.body.try_clone()?,
            stream: self.stream,
            timeouts: self.timeouts,
        })
    }
}

/// Response returned by a [`Transport`]
pub struct TransportResponse {
    status: u16,
    headers: Headers,
    body: Box<dyn Read + Send>,
}

impl TransportResponse {
    pub fn new(status: u16, headers: Headers, body: Box<dyn Read + Send>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Response with a fully buffered body
    pub fn from_bytes(status: u16, headers: Headers, body: impl Into<Vec<u8>>) -> Self {
        Self::new(status, headers, Box::new(Cursor::new(body.into())))
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn into_reader(self) -> Box<dyn Read + Send> {
        self.body
    }

    pub fn bytes(mut self) -> crate::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.body.read_to_end(&mut buf)?;
        Ok(buf)
    }

    pub fn text(self) -> crate::Result<String> {
        let bytes = self.bytes()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn json<T: DeserializeOwned>(self) -> crate::Result<T> {
        let bytes = self.bytes()?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Transport-level failure, distinct from an HTTP status
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("connection failed: {message}")]
    Connect { message: String },

    #[error("{phase} timeout: {message}")]
    Timeout { phase: TimeoutPhase, message: String },

    #[error("too many redirects: {message}")]
    Redirect { message: String },

    #[error("failed reading response: {message}")]
    Read { message: String },

    #[error("HTTP error: {message}")]
    Http {
        message: String,
        status: Option<u16>,
    },

    #[error("request could not be built: {message}")]
    Request { message: String },
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Connect { message } | TransportError::Read { message } => {
                Error::Connection { message }
            }
            TransportError::Timeout { phase, message } => Error::Timeout { message, phase },
            TransportError::Redirect { message } => Error::TooManyRedirects { message },
            TransportError::Http { message, status } => Error::Http {
                message,
                status_code: status,
            },
            TransportError::Request { message } => Error::InvalidRequest { message },
        }
    }
}

/// Performs a single HTTP request
pub trait Transport: Send + Sync {
    fn execute(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}
