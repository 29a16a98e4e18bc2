//! Chunked download against expiring signed URLs
//!
//! [`DownloadMachine`] holds all counters and decides, without doing any I/O,
//! whether an expired URL is refreshed or the transfer gives up.
//! [`ResumableDownload`] drives it with ranged GETs.

use std::io::{Read, Write};

use tracing::{debug, trace, warn};

use super::chunk::{range_header, validate_chunk_size, ContentRange};
use crate::error::{Error, ExhaustionReason};
use crate::http::{ApiRequest, Client, Outcome};
use crate::signed_url::SignedUrlResolver;
use crate::transport::{Method, Session, TransportRequest};
use crate::Result;

/// Bounds on signed-URL refetches for one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshLimits {
    pub max_refreshes: u32,
    pub max_refreshes_without_progress: u32,
}

impl Default for RefreshLimits {
    fn default() -> Self {
        Self {
            max_refreshes: 100,
            max_refreshes_without_progress: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    FetchingUrl,
    Transferring,
    RefreshingUrl,
    Done,
    Failed,
}

/// What happened to the last ranged request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkEvent {
    /// `len` bytes were written to the sink
    Received { len: u64, complete: bool },
    /// The URL stopped working
    Expired,
    /// The response did not match the requested range
    Corrupted(String),
}

/// Refresh bookkeeping for a resumable download
#[derive(Debug, Clone)]
pub struct DownloadMachine {
    resource_id: String,
    limits: RefreshLimits,
    state: DownloadState,
    offset: u64,
    bytes_from_current_url: u64,
    bytes_at_last_refresh: u64,
    refreshes: u32,
    refreshes_without_progress: u32,
}

impl DownloadMachine {
    pub fn new(resource_id: impl Into<String>, limits: RefreshLimits) -> Self {
        Self::starting_at(resource_id, limits, 0)
    }

    /// Machine resuming a transfer that already holds `offset` bytes
    pub fn starting_at(resource_id: impl Into<String>, limits: RefreshLimits, offset: u64) -> Self {
        Self {
            resource_id: resource_id.into(),
            limits,
            state: DownloadState::FetchingUrl,
            offset,
            bytes_from_current_url: 0,
            bytes_at_last_refresh: offset,
            refreshes: 0,
            refreshes_without_progress: 0,
        }
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    /// Cumulative bytes written across all URLs
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn bytes_from_current_url(&self) -> u64 {
        self.bytes_from_current_url
    }

    pub fn refreshes(&self) -> u32 {
        self.refreshes
    }

    pub fn refreshes_without_progress(&self) -> u32 {
        self.refreshes_without_progress
    }

    /// A (new) signed URL is in hand
    pub fn url_ready(&mut self) {
        if matches!(
            self.state,
            DownloadState::FetchingUrl | DownloadState::RefreshingUrl
        ) {
            self.bytes_from_current_url = 0;
            self.state = DownloadState::Transferring;
        }
    }

    /// Apply the outcome of one chunk request
    pub fn on_chunk(&mut self, event: ChunkEvent) -> Result<DownloadState> {
        if self.state != DownloadState::Transferring {
            return Err(Error::invalid_request(format!(
                "chunk event {event:?} in state {:?}",
                self.state
            )));
        }

        match event {
            ChunkEvent::Received { len, complete } => {
                self.offset += len;
                self.bytes_from_current_url += len;
                if complete {
                    self.state = DownloadState::Done;
                }
            }
            ChunkEvent::Expired => self.on_expired()?,
            ChunkEvent::Corrupted(message) => {
                self.state = DownloadState::Failed;
                return Err(Error::DataCorruption { message });
            }
        }
        Ok(self.state)
    }

    fn on_expired(&mut self) -> Result<()> {
        if self.refreshes >= self.limits.max_refreshes {
            return Err(self.exhausted(ExhaustionReason::MaxRefreshes));
        }

        if self.offset > self.bytes_at_last_refresh {
            self.refreshes_without_progress = 0;
        } else if self.refreshes_without_progress <= self.limits.max_refreshes_without_progress {
            self.refreshes_without_progress += 1;
        } else {
            return Err(self.exhausted(ExhaustionReason::NoProgress));
        }

        self.refreshes += 1;
        self.bytes_at_last_refresh = self.offset;
        self.state = DownloadState::RefreshingUrl;
        debug!(
            resource_id = %self.resource_id,
            refreshes = self.refreshes,
            refreshes_without_progress = self.refreshes_without_progress,
            offset = self.offset,
            "signed URL expired, refreshing"
        );
        Ok(())
    }

    fn exhausted(&mut self, reason: ExhaustionReason) -> Error {
        self.state = DownloadState::Failed;
        warn!(resource_id = %self.resource_id, %reason, refreshes = self.refreshes, "giving up on download");
        Error::TransferExhausted {
            resource_id: self.resource_id.clone(),
            reason,
            refreshes: self.refreshes,
        }
    }
}

/// Supplies fresh signed URLs
pub trait UrlSource {
    fn next_url(&mut self) -> Result<String>;
}

impl<F> UrlSource for F
where
    F: FnMut() -> Result<String>,
{
    fn next_url(&mut self) -> Result<String> {
        self()
    }
}

/// Ranged-GET download loop
pub struct ResumableDownload<U> {
    session: Session,
    urls: U,
    chunk_size: u64,
    machine: DownloadMachine,
}

impl<U: UrlSource> ResumableDownload<U> {
    pub fn new(resource_id: &str, session: Session, urls: U, chunk_size: u64) -> Result<Self> {
        validate_chunk_size(chunk_size)?;
        Ok(Self {
            session,
            urls,
            chunk_size,
            machine: DownloadMachine::new(resource_id, RefreshLimits::default()),
        })
    }

    pub fn with_limits(mut self, limits: RefreshLimits) -> Self {
        self.machine.limits = limits;
        self
    }

    pub fn machine(&self) -> &DownloadMachine {
        &self.machine
    }

    /// Run to completion, returning the number of bytes written
    pub fn run<W: Write>(&mut self, sink: &mut W) -> Result<u64> {
        let mut url = self.urls.next_url()?;
        self.machine.url_ready();

        loop {
            let event = self.fetch_chunk(&url, sink)?;
            match self.machine.on_chunk(event)? {
                DownloadState::Done => {
                    sink.flush()?;
                    debug!(
                        resource_id = %self.machine.resource_id,
                        bytes = self.machine.offset,
                        refreshes = self.machine.refreshes,
                        "download complete"
                    );
                    return Ok(self.machine.offset);
                }
                DownloadState::RefreshingUrl => {
                    url = self.urls.next_url()?;
                    self.machine.url_ready();
                }
                _ => {}
            }
        }
    }

    fn fetch_chunk<W: Write>(&self, url: &str, sink: &mut W) -> Result<ChunkEvent> {
        let offset = self.machine.offset;
        let range = range_header(offset, self.chunk_size);
        trace!(%range, "requesting chunk");

        let request = TransportRequest::new(Method::Get, url).header("range", range);
        let response = self.session.execute(request)?;
        let status = response.status();

        match status {
            206 => {
                let Some(content_range) = response.header("content-range").and_then(ContentRange::parse)
                else {
                    return Ok(ChunkEvent::Corrupted(format!(
                        "missing or invalid content-range at offset {offset}"
                    )));
                };
                let body = response.bytes()?;
                if body.is_empty() {
                    return Ok(ChunkEvent::Received {
                        len: 0,
                        complete: true,
                    });
                }
                if content_range.start() != Some(offset) {
                    return Ok(ChunkEvent::Corrupted(format!(
                        "requested offset {offset}, got range {:?}",
                        content_range.span
                    )));
                }
                let len = body.len() as u64;
                if len != content_range.len() {
                    return Ok(ChunkEvent::Corrupted(format!(
                        "content-range advertises {} bytes, body has {len}",
                        content_range.len()
                    )));
                }
                sink.write_all(&body)?;
                let complete = match content_range.total {
                    Some(total) => offset + len >= total,
                    None => len < self.chunk_size,
                };
                Ok(ChunkEvent::Received { len, complete })
            }
            200 if offset == 0 => {
                let body = response.bytes()?;
                sink.write_all(&body)?;
                Ok(ChunkEvent::Received {
                    len: body.len() as u64,
                    complete: true,
                })
            }
            200 => Ok(ChunkEvent::Corrupted(format!(
                "storage ignored range request at offset {offset}"
            ))),
            416 => Ok(ChunkEvent::Received {
                len: 0,
                complete: true,
            }),
            _ => {
                debug!(status, offset, "storage rejected signed URL");
                Ok(ChunkEvent::Expired)
            }
        }
    }
}

/// Download through a sequence of signed URLs, resuming after each expiry
pub fn download_resumable<W: Write>(
    client: &Client,
    resource_id: &str,
    sink: &mut W,
    chunk_size: u64,
) -> Result<u64> {
    validate_chunk_size(chunk_size)?;
    let resolver = SignedUrlResolver::new(client);
    let urls = || resolver.download_url(resource_id);
    debug!(resource_id, chunk_size, "starting resumable signed URL download");
    ResumableDownload::new(resource_id, client.storage_session(), urls, chunk_size)?.run(sink)
}

/// Download with a single streaming GET against one signed URL
pub fn download_direct<W: Write>(
    client: &Client,
    resource_id: &str,
    sink: &mut W,
    chunk_size: u64,
) -> Result<u64> {
    validate_chunk_size(chunk_size)?;
    let url = SignedUrlResolver::new(client).download_url(resource_id)?;
    debug!(resource_id, "starting direct signed URL download");

    let request = TransportRequest::new(Method::Get, url).stream(true);
    let response = client.storage_session().execute(request)?;
    if response.status() != 200 {
        return Err(Error::Http {
            message: format!("storage answered {} for resource {resource_id}", response.status()),
            status_code: Some(response.status()),
        });
    }

    copy_in_chunks(response.into_reader(), sink, chunk_size)
}

/// Download through the API content endpoint
pub fn download_api<W: Write>(
    client: &Client,
    resource_id: &str,
    sink: &mut W,
    chunk_size: u64,
) -> Result<u64> {
    validate_chunk_size(chunk_size)?;
    debug!(resource_id, "downloading through the API");

    let outcome = client.dispatch(
        Method::Get,
        &["resources", resource_id, "content"],
        ApiRequest::new().header("accept", "*/*").stream(true),
    )?;
    match outcome {
        Outcome::Response(response) => copy_in_chunks(response.into_reader(), sink, chunk_size),
        Outcome::NoContent => Ok(0),
    }
}

fn copy_in_chunks<R: Read, W: Write>(mut reader: R, sink: &mut W, chunk_size: u64) -> Result<u64> {
    let mut buf = vec![0u8; chunk_size.min(usize::MAX as u64) as usize];
    let mut written = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n])?;
        written += n as u64;
    }
    sink.flush()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::Headers;
    use crate::http::RetryPolicy;
    use crate::transport::scripted::{reply, reply_with_headers, ScriptedTransport};
    use std::sync::Arc;

    const CHUNK: u64 = 262_144;

    fn transferring() -> DownloadMachine {
        let mut machine = DownloadMachine::new("r1", RefreshLimits::default());
        machine.url_ready();
        machine
    }

    #[test]
    fn test_received_advances_offset() {
        let mut machine = transferring();
        assert_eq!(
            machine
                .on_chunk(ChunkEvent::Received {
                    len: 10,
                    complete: false
                })
                .unwrap(),
            DownloadState::Transferring
        );
        assert_eq!(
            machine
                .on_chunk(ChunkEvent::Received {
                    len: 5,
                    complete: true
                })
                .unwrap(),
            DownloadState::Done
        );
        assert_eq!(machine.offset(), 15);
        assert_eq!(machine.bytes_from_current_url(), 15);
    }

    #[test]
    fn test_expiry_without_progress_is_bounded() {
        let mut machine = transferring();
        let mut refreshes = 0;
        let err = loop {
            match machine.on_chunk(ChunkEvent::Expired) {
                Ok(DownloadState::RefreshingUrl) => {
                    refreshes += 1;
                    machine.url_ready();
                }
                Ok(other) => panic!("unexpected state {other:?}"),
                Err(err) => break err,
            }
        };

        assert_eq!(refreshes, 6);
        assert_eq!(machine.state(), DownloadState::Failed);
        assert!(matches!(
            err,
            Error::TransferExhausted {
                reason: ExhaustionReason::NoProgress,
                refreshes: 6,
                ..
            }
        ));
    }

    #[test]
    fn test_progress_resets_no_progress_counter() {
        let mut machine = transferring();
        machine.on_chunk(ChunkEvent::Expired).unwrap();
        machine.url_ready();
        assert_eq!(machine.refreshes_without_progress(), 1);

        machine
            .on_chunk(ChunkEvent::Received {
                len: 4,
                complete: false,
            })
            .unwrap();
        machine.on_chunk(ChunkEvent::Expired).unwrap();
        machine.url_ready();

        assert_eq!(machine.refreshes_without_progress(), 0);
        assert_eq!(machine.refreshes(), 2);
        assert_eq!(machine.offset(), 4);
        assert_eq!(machine.bytes_from_current_url(), 0);
    }

    #[test]
    fn test_max_refreshes_caps_progressing_transfer() {
        let limits = RefreshLimits {
            max_refreshes: 3,
            max_refreshes_without_progress: 5,
        };
        let mut machine = DownloadMachine::new("r1", limits);
        machine.url_ready();

        for _ in 0..3 {
            machine
                .on_chunk(ChunkEvent::Received {
                    len: 1,
                    complete: false,
                })
                .unwrap();
            assert_eq!(
                machine.on_chunk(ChunkEvent::Expired).unwrap(),
                DownloadState::RefreshingUrl
            );
            machine.url_ready();
        }
        machine
            .on_chunk(ChunkEvent::Received {
                len: 1,
                complete: false,
            })
            .unwrap();

        assert!(matches!(
            machine.on_chunk(ChunkEvent::Expired),
            Err(Error::TransferExhausted {
                reason: ExhaustionReason::MaxRefreshes,
                refreshes: 3,
                ..
            })
        ));
    }

    #[test]
    fn test_corruption_is_fatal() {
        let mut machine = transferring();
        assert!(matches!(
            machine.on_chunk(ChunkEvent::Corrupted("bad".into())),
            Err(Error::DataCorruption { .. })
        ));
        assert_eq!(machine.state(), DownloadState::Failed);
    }

    #[test]
    fn test_event_outside_transfer_is_rejected() {
        let mut machine = DownloadMachine::new("r1", RefreshLimits::default());
        assert!(machine.on_chunk(ChunkEvent::Expired).is_err());
    }

    fn storage(data: Vec<u8>, expire_every_other: bool) -> Arc<ScriptedTransport> {
        let mut calls = 0;
        Arc::new(ScriptedTransport::new(move |request| {
            calls += 1;
            if expire_every_other && calls % 2 == 0 {
                return Ok(reply(403, "expired"));
            }
            let range = request.header("range").unwrap_or_default();
            let (start, end) = range
                .trim_start_matches("bytes=")
                .split_once('-')
                .map(|(s, e)| (s.parse::<usize>().unwrap(), e.parse::<usize>().unwrap()))
                .unwrap();
            let end = end.min(data.len() - 1);
            let headers = Headers::new().with(
                "content-range",
                format!("bytes {start}-{end}/{}", data.len()),
            );
            Ok(reply_with_headers(206, headers, data[start..=end].to_vec()))
        }))
    }

    #[test]
    fn test_run_with_alternating_expiry_completes() {
        let data: Vec<u8> = (0..(CHUNK as usize * 3 + 17)).map(|i| (i % 251) as u8).collect();
        let transport = storage(data.clone(), true);
        let session = Session::new(transport, RetryPolicy::none());
        let mut issued = 0;
        let urls = || -> Result<String> {
            issued += 1;
            Ok(format!("https://storage/obj?sig={issued}"))
        };

        let mut sink = Vec::new();
        let mut download = ResumableDownload::new("r1", session, urls, CHUNK).unwrap();
        let written = download.run(&mut sink).unwrap();

        assert_eq!(written, data.len() as u64);
        assert_eq!(sink, data);
        assert_eq!(download.machine().refreshes(), 3);
    }

    #[test]
    fn test_run_detects_offset_mismatch() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            let headers = Headers::new().with("content-range", "bytes 10-19/100");
            Ok(reply_with_headers(206, headers, vec![0u8; 10]))
        }));
        let session = Session::new(transport, RetryPolicy::none());
        let urls = || -> Result<String> { Ok("https://storage/obj".to_string()) };

        let mut sink = Vec::new();
        let err = ResumableDownload::new("r1", session, urls, CHUNK)
            .unwrap()
            .run(&mut sink)
            .unwrap_err();

        assert!(matches!(err, Error::DataCorruption { .. }));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_invalid_chunk_size_rejected_before_network() {
        let transport = Arc::new(ScriptedTransport::new(|_| Ok(reply(200, ""))));
        let session = Session::new(transport.clone(), RetryPolicy::none());
        let urls = || -> Result<String> { Ok("https://storage/obj".to_string()) };

        assert!(matches!(
            ResumableDownload::new("r1", session, urls, 1000),
            Err(Error::InvalidRequest { .. })
        ));
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn test_small_object_answered_with_200() {
        let transport = Arc::new(ScriptedTransport::new(|_| Ok(reply(200, "hello"))));
        let session = Session::new(transport, RetryPolicy::none());
        let urls = || -> Result<String> { Ok("https://storage/obj".to_string()) };

        let mut sink = Vec::new();
        let written = ResumableDownload::new("r1", session, urls, CHUNK)
            .unwrap()
            .run(&mut sink)
            .unwrap();

        assert_eq!(written, 5);
        assert_eq!(sink, b"hello");
    }
}
