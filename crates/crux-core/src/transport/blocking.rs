//! Production transport on `reqwest::blocking`

use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Body, Client as ReqwestClient, RequestBuilder};
use reqwest::redirect::Policy;
use tracing::debug;

use super::{
    Method, RequestBody, Timeouts, Transport, TransportError, TransportRequest, TransportResponse,
};
use crate::error::{Error, TimeoutPhase};
use crate::headers::Headers;
use crate::Result;

/// Events buffered between the exchange worker and the caller
const EVENT_BUFFER: usize = 16;

/// Largest body piece handed over by the exchange worker
const PIECE_SIZE: usize = 64 * 1024;

/// Settings shared by every pooled reqwest client
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Scheme (`http`, `https` or `all`) to proxy URL
    pub proxies: HashMap<String, String>,
    pub max_redirects: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            proxies: HashMap::new(),
            max_redirects: 10,
        }
    }
}

/// [`Transport`] backed by blocking reqwest clients.
///
/// reqwest fixes the connect timeout per client, so one client is pooled per
/// distinct connect timeout. The read timeout of a [`TransportRequest`] is an
/// inactivity bound: each exchange runs on a worker thread and the caller
/// gives up once nothing has moved for that long.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    config: TransportConfig,
    clients: Arc<Mutex<HashMap<Duration, ReqwestClient>>>,
}

impl ReqwestTransport {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let connect = Timeouts::default().connect;
        let client = build_client(config, connect)?;
        Ok(Self {
            config: config.clone(),
            clients: Arc::new(Mutex::new(HashMap::from([(connect, client)]))),
        })
    }

    fn client_for(&self, connect: Duration) -> std::result::Result<ReqwestClient, TransportError> {
        let mut clients = self.clients.lock().map_err(|_| TransportError::Request {
            message: "HTTP client pool is poisoned".to_string(),
        })?;
        if let Some(client) = clients.get(&connect) {
            return Ok(client.clone());
        }

        debug!(connect_timeout = ?connect, "building HTTP client");
        let client = build_client(&self.config, connect).map_err(|e| TransportError::Request {
            message: e.to_string(),
        })?;
        clients.insert(connect, client.clone());
        Ok(client)
    }

    #[cfg(test)]
    fn pooled_clients(&self) -> usize {
        self.clients.lock().map(|clients| clients.len()).unwrap_or_default()
    }

    fn method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Put => reqwest::Method::PUT,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        }
    }

    fn prepare(
        client: &ReqwestClient,
        request: TransportRequest,
        events: &SyncSender<Event>,
    ) -> RequestBuilder {
        let mut builder = client.request(Self::method(request.method), &request.url);

        for (key, value) in request.headers.iter() {
            builder = builder.header(key, value);
        }

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        // Sent bodies report progress so a slow upload is not mistaken for
        // a silent server.
        match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Form(pairs) => builder.form(&pairs),
            RequestBody::Bytes(bytes) => {
                let length = bytes.len() as u64;
                let reader = ProgressReader::new(Box::new(Cursor::new(bytes)), events.clone());
                builder.body(Body::sized(reader, length))
            }
            RequestBody::Stream { reader, length } => {
                let reader = ProgressReader::new(reader, events.clone());
                match length {
                    Some(length) => builder.body(Body::sized(reader, length)),
                    None => builder.body(Body::new(reader)),
                }
            }
        }
    }
}

impl Transport for ReqwestTransport {
    fn execute(&self, request: TransportRequest) -> std::result::Result<TransportResponse, TransportError> {
        let client = self.client_for(request.timeouts.connect)?;
        let idle = request.timeouts.read;
        let stream = request.stream;

        let (events, inbox) = mpsc::sync_channel(EVENT_BUFFER);
        let builder = Self::prepare(&client, request, &events);
        thread::Builder::new()
            .name("crux-transport".to_string())
            .spawn(move || exchange(builder, events))
            .map_err(|e| TransportError::Request {
                message: format!("failed to start transport worker: {e}"),
            })?;

        let (status, headers) = await_head(&inbox, idle)?;
        let mut body = IdleTimeoutReader::new(inbox, idle);

        if stream {
            return Ok(TransportResponse::new(status, headers, Box::new(body)));
        }

        let mut buf = Vec::new();
        body.read_to_end(&mut buf).map_err(|e| transport_error_from_io(&e))?;
        Ok(TransportResponse::from_bytes(status, headers, buf))
    }
}

enum Event {
    /// Some of the request body went out
    Progress,
    Head(u16, Headers),
    Piece(Vec<u8>),
    Failed(TransportError),
    End,
}

fn build_client(config: &TransportConfig, connect: Duration) -> Result<ReqwestClient> {
    let mut builder = ReqwestClient::builder()
        .connect_timeout(connect)
        .timeout(None::<Duration>)
        .redirect(Policy::limited(config.max_redirects));

    for (scheme, proxy_url) in &config.proxies {
        let proxy = match scheme.as_str() {
            "http" => reqwest::Proxy::http(proxy_url),
            "https" => reqwest::Proxy::https(proxy_url),
            "all" => reqwest::Proxy::all(proxy_url),
            other => {
                return Err(Error::Configuration {
                    message: format!("Unsupported proxy scheme: {other}"),
                })
            }
        }
        .map_err(|e| Error::Configuration {
            message: format!("Invalid proxy URL {proxy_url}: {e}"),
        })?;
        builder = builder.proxy(proxy);
    }

    builder.build().map_err(|e| Error::Configuration {
        message: format!("Failed to create HTTP client: {e}"),
    })
}

/// Worker side of one exchange: send, then hand the body over piece by piece
fn exchange(builder: RequestBuilder, events: SyncSender<Event>) {
    let mut response = match builder.send() {
        Ok(response) => response,
        Err(err) => {
            let _ = events.send(Event::Failed(classify_error(&err)));
            return;
        }
    };

    let status = response.status().as_u16();
    let headers: Headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .collect();
    if events.send(Event::Head(status, headers)).is_err() {
        return;
    }

    let mut buf = vec![0u8; PIECE_SIZE];
    loop {
        let event = match response.read(&mut buf) {
            Ok(0) => Event::End,
            Ok(n) => Event::Piece(buf[..n].to_vec()),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => Event::Failed(transport_error_from_io(&err)),
        };
        let last = !matches!(event, Event::Piece(_));
        // A send error means the caller dropped the body
        if events.send(event).is_err() || last {
            return;
        }
    }
}

fn await_head(
    inbox: &Receiver<Event>,
    idle: Duration,
) -> std::result::Result<(u16, Headers), TransportError> {
    loop {
        match inbox.recv_timeout(idle) {
            Ok(Event::Progress) => continue,
            Ok(Event::Head(status, headers)) => return Ok((status, headers)),
            Ok(Event::Failed(err)) => return Err(err),
            Ok(Event::Piece(_) | Event::End) => {
                return Err(TransportError::Read {
                    message: "response body arrived before its head".to_string(),
                })
            }
            Err(RecvTimeoutError::Timeout) => return Err(idle_timeout(idle)),
            Err(RecvTimeoutError::Disconnected) => return Err(worker_stopped()),
        }
    }
}

/// Response body fed by the exchange worker; fails after `idle` without data
struct IdleTimeoutReader {
    inbox: Receiver<Event>,
    idle: Duration,
    pending: Cursor<Vec<u8>>,
    finished: bool,
}

impl IdleTimeoutReader {
    fn new(inbox: Receiver<Event>, idle: Duration) -> Self {
        Self {
            inbox,
            idle,
            pending: Cursor::new(Vec::new()),
            finished: false,
        }
    }

    fn fail(&mut self, err: TransportError) -> io::Error {
        self.finished = true;
        let kind = match err {
            TransportError::Timeout { .. } => io::ErrorKind::TimedOut,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

impl Read for IdleTimeoutReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.pending.read(buf)?;
            if n > 0 || buf.is_empty() || self.finished {
                return Ok(n);
            }

            match self.inbox.recv_timeout(self.idle) {
                Ok(Event::Piece(piece)) => self.pending = Cursor::new(piece),
                Ok(Event::End) => self.finished = true,
                Ok(Event::Failed(err)) => return Err(self.fail(err)),
                Ok(Event::Progress | Event::Head(..)) => {}
                Err(RecvTimeoutError::Timeout) => return Err(self.fail(idle_timeout(self.idle))),
                Err(RecvTimeoutError::Disconnected) => return Err(self.fail(worker_stopped())),
            }
        }
    }
}

/// Request body wrapper that reports each read to the caller
struct ProgressReader {
    inner: Box<dyn Read + Send>,
    events: SyncSender<Event>,
}

impl ProgressReader {
    fn new(inner: Box<dyn Read + Send>, events: SyncSender<Event>) -> Self {
        Self { inner, events }
    }
}

impl Read for ProgressReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        // A full buffer already tells the caller the upload is moving
        let _ = self.events.try_send(Event::Progress);
        Ok(n)
    }
}

fn idle_timeout(idle: Duration) -> TransportError {
    TransportError::Timeout {
        phase: TimeoutPhase::Read,
        message: format!("no data received for {idle:?}"),
    }
}

fn worker_stopped() -> TransportError {
    TransportError::Read {
        message: "transport worker stopped before the exchange completed".to_string(),
    }
}

/// Recover the transport classification of a body read failure
fn transport_error_from_io(err: &io::Error) -> TransportError {
    if let Some(inner) = err.get_ref() {
        if let Some(transport) = inner.downcast_ref::<TransportError>() {
            return transport.clone();
        }
        if let Some(reqwest_err) = inner.downcast_ref::<reqwest::Error>() {
            return classify_error(reqwest_err);
        }
    }
    match err.kind() {
        io::ErrorKind::TimedOut => TransportError::Timeout {
            phase: TimeoutPhase::Read,
            message: err.to_string(),
        },
        _ => TransportError::Read {
            message: err.to_string(),
        },
    }
}

/// Translate a reqwest failure into the transport taxonomy
fn classify_error(err: &reqwest::Error) -> TransportError {
    let message = err.to_string();
    if err.is_timeout() {
        let phase = if err.is_connect() {
            TimeoutPhase::Connect
        } else {
            TimeoutPhase::Read
        };
        TransportError::Timeout { phase, message }
    } else if err.is_connect() {
        TransportError::Connect { message }
    } else if err.is_redirect() {
        TransportError::Redirect { message }
    } else if err.is_body() || err.is_decode() {
        TransportError::Read { message }
    } else if err.is_builder() {
        TransportError::Request { message }
    } else {
        TransportError::Http {
            message,
            status: err.status().map(|s| s.as_u16()),
        }
    }
}
