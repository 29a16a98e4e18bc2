//! Request dispatcher for the platform API
//!
//! Builds the URL, attaches credentials, sends through the retrying session
//! and classifies the response.

use std::io::Read;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use super::auth::{AuthHandler, BearerAuth};
use super::builder::UrlBuilder;
use super::response::{check_status, decode, Dispatched, Outcome, Pagination, ResponseShape};
use super::retry::RetryPolicy;
use crate::config::ClientConfig;
use crate::headers::Headers;
use crate::transport::{
    Method, ReqwestTransport, RequestBody, Session, Timeouts, Transport, TransportConfig,
    TransportRequest,
};
use crate::Result;

/// Per-call options for [`Client::dispatch`]
#[derive(Debug, Default)]
pub struct ApiRequest {
    headers: Headers,
    params: Vec<(String, String)>,
    body: RequestBody,
    stream: bool,
    timeouts: Timeouts,
}

impl ApiRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.set(key, value);
        self
    }

    pub fn headers(mut self, headers: &Headers) -> Self {
        self.headers.merge(headers);
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = RequestBody::Json(body);
        self
    }

    pub fn form(mut self, pairs: Vec<(String, String)>) -> Self {
        self.body = RequestBody::Form(pairs);
        self
    }

    pub fn bytes(mut self, bytes: Vec<u8>) -> Self {
        self.body = RequestBody::Bytes(bytes);
        self
    }

    /// One-shot body; the call will not be retried
    pub fn reader(mut self, reader: Box<dyn Read + Send>, length: Option<u64>) -> Self {
        self.body = RequestBody::Stream { reader, length };
        self
    }

    /// Leave the response body unread so it can be streamed
    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

/// Authenticated client for the platform API
#[derive(Clone)]
pub struct Client {
    config: ClientConfig,
    urls: UrlBuilder,
    session: Session,
    auth: Arc<dyn AuthHandler>,
}

impl Client {
    /// Create a client backed by a reqwest transport
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let transport = ReqwestTransport::new(&TransportConfig {
            proxies: config.proxies.clone(),
            ..Default::default()
        })?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create a client on top of an existing transport
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let urls = UrlBuilder::new(config.api_host.clone(), config.api_prefix.clone());
        let auth = Arc::new(BearerAuth::new(
            config.api_key.clone(),
            config.user_agent.clone(),
        ));
        Self {
            config,
            urls,
            session: Session::new(transport, RetryPolicy::default()),
            auth,
        }
    }

    /// Replace the retry policy for API calls and storage sessions
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.session = Session::new(self.session.transport(), policy);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Absolute URL for an API path
    pub fn url_for<S: AsRef<str>>(&self, path: &[S]) -> Result<String> {
        self.urls.build(path)
    }

    /// Unauthenticated session sharing this client's transport and retry
    /// policy, for talking to storage URLs
    pub fn storage_session(&self) -> Session {
        Session::new(self.session.transport(), self.session.retry_policy().clone())
    }

    /// Send an API call and check its status, passing the body through
    pub fn dispatch<S: AsRef<str>>(
        &self,
        method: Method,
        path: &[S],
        request: ApiRequest,
    ) -> Result<Outcome> {
        let url = self.urls.build(path)?;

        let mut headers = request.headers;
        self.auth.apply_auth(&mut headers)?;

        debug!(%method, %url, stream = request.stream, "dispatching API call");
        trace!(params = ?request.params, body = ?request.body, "API call payload");

        let transport_request = TransportRequest {
            method,
            url,
            headers,
            query: request.params,
            body: request.body,
            stream: request.stream,
            timeouts: request.timeouts,
        };

        let response = self.session.execute(transport_request)?;
        check_status(response)
    }

    /// Send an API call and deserialize the body into `T`.
    ///
    /// A paginated body writes its cursor into `pagination`; an empty 2xx body
    /// is reported as [`Dispatched::NoContent`].
    pub fn dispatch_as<T, S>(
        &self,
        method: Method,
        path: &[S],
        request: ApiRequest,
        pagination: Option<&mut Pagination>,
    ) -> Result<Dispatched<T>>
    where
        T: DeserializeOwned,
        S: AsRef<str>,
    {
        let response = match self.dispatch(method, path, request)? {
            Outcome::NoContent => return Ok(Dispatched::NoContent),
            Outcome::Response(response) => response,
        };

        let bytes = response.bytes()?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Dispatched::NoContent);
        }

        let value: Value = serde_json::from_slice(&bytes)?;
        decode(ResponseShape::classify(value), pagination)
    }

    /// Shorthand for a call that returns a single object
    pub fn call<T, S>(&self, method: Method, path: &[S], request: ApiRequest) -> Result<T>
    where
        T: DeserializeOwned,
        S: AsRef<str>,
    {
        self.dispatch_as(method, path, request, None)?.into_one()
    }

    /// Shorthand for a call that returns a list
    pub fn call_list<T, S>(&self, method: Method, path: &[S], request: ApiRequest) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
        S: AsRef<str>,
    {
        Ok(self.dispatch_as(method, path, request, None)?.into_vec())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
