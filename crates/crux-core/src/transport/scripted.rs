//! In-memory transport for tests
//!
//! Answers requests from a closure or a fixed queue and records every request
//! it sees, so tests can assert on the exact wire traffic without sockets.

use std::collections::VecDeque;
use std::io::Read;
use std::sync::Mutex;

use serde_json::Value;

use super::{Method, RequestBody, Transport, TransportError, TransportRequest, TransportResponse};
use crate::headers::Headers;

type Reply = Result<TransportResponse, TransportError>;
type Handler = Box<dyn FnMut(&RecordedRequest) -> Reply + Send>;

/// Snapshot of a request as it reached the transport
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub query: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn json(&self) -> Option<Value> {
        self.body
            .as_deref()
            .and_then(|b| serde_json::from_slice(b).ok())
    }
}

/// Scripted [`Transport`] implementation
pub struct ScriptedTransport {
    handler: Mutex<Handler>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    /// Answer each request with `handler`
    pub fn new<F>(handler: F) -> Self
    where
        F: FnMut(&RecordedRequest) -> Reply + Send + 'static,
    {
        Self {
            handler: Mutex::new(Box::new(handler)),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer requests in order from `replies`; extra requests fail to connect.
    pub fn sequence(replies: Vec<Reply>) -> Self {
        let mut queue: VecDeque<Reply> = replies.into();
        Self::new(move |request| {
            queue.pop_front().unwrap_or_else(|| {
                Err(TransportError::Connect {
                    message: format!("no scripted reply left for {} {}", request.method, request.url),
                })
            })
        })
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }
}

impl Transport for ScriptedTransport {
    fn execute(&self, request: TransportRequest) -> Reply {
        let body = match request.body {
            RequestBody::Empty => None,
            RequestBody::Json(value) => serde_json::to_vec(&value).ok(),
            RequestBody::Form(pairs) => Some(
                pairs
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<_>>()
                    .join("&")
                    .into_bytes(),
            ),
            RequestBody::Bytes(bytes) => Some(bytes),
            RequestBody::Stream { mut reader, .. } => {
                let mut buf = Vec::new();
                reader
                    .read_to_end(&mut buf)
                    .map_err(|e| TransportError::Request {
                        message: e.to_string(),
                    })?;
                Some(buf)
            }
        };

        let recorded = RecordedRequest {
            method: request.method,
            url: request.url,
            headers: request.headers,
            query: request.query,
            body,
        };

        if let Ok(mut requests) = self.requests.lock() {
            requests.push(recorded.clone());
        }

        let mut handler = self.handler.lock().map_err(|_| TransportError::Request {
            message: "scripted handler poisoned".to_string(),
        })?;
        (handler)(&recorded)
    }
}

/// Buffered response with the given status and body
pub fn reply(status: u16, body: impl Into<Vec<u8>>) -> TransportResponse {
    TransportResponse::from_bytes(status, Headers::new(), body)
}

/// Buffered response with a JSON body
pub fn json_reply(status: u16, body: Value) -> TransportResponse {
    TransportResponse::from_bytes(
        status,
        Headers::new().with("content-type", "application/json"),
        body.to_string(),
    )
}

/// Buffered response with extra headers
pub fn reply_with_headers(status: u16, headers: Headers, body: impl Into<Vec<u8>>) -> TransportResponse {
    TransportResponse::from_bytes(status, headers, body)
}
