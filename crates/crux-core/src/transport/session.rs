//! Transport plus retry policy plus default headers

use std::sync::Arc;

use super::{Transport, TransportRequest, TransportResponse};
use crate::headers::Headers;
use crate::http::retry::{execute_with_retry, RetryPolicy};
use crate::Result;

/// Reusable handle that owns a transport, a retry policy and headers sent
/// with every request.
///
/// Cloning is cheap: the transport is shared.
#[derive(Clone)]
pub struct Session {
    transport: Arc<dyn Transport>,
    retry_policy: RetryPolicy,
    headers: Headers,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>, retry_policy: RetryPolicy) -> Self {
        Self {
            transport,
            retry_policy,
            headers: Headers::new(),
        }
    }

    /// Attach default headers; on conflict they override per-request headers.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    /// Send a request, retrying transient failures per the session policy.
    pub fn execute(&self, mut request: TransportRequest) -> Result<TransportResponse> {
        request.headers.merge(&self.headers);
        execute_with_retry(self.transport.as_ref(), request, &self.retry_policy)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("retry_policy", &self.retry_policy)
            .field("headers", &self.headers.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
