//! Resumable upload against a signed storage session
//!
//! Follows the resumable protocol of the storage backend: one POST opens the
//! session, then fixed-size PUTs carry `content-range` headers until the
//! backend answers 200/201. A 308 reports how much it has persisted.

use std::io::{Read, Seek, SeekFrom};

use serde_json::{json, Value};
use tracing::{debug, trace};

use super::chunk::{persisted_bytes, validate_chunk_size, DEFAULT_CHUNK_SIZE};
use crate::error::Error;
use crate::http::{ApiRequest, Client, Outcome};
use crate::signed_url::SignedUrlResolver;
use crate::transport::{Method, RequestBody, Session, TransportRequest, TransportResponse};
use crate::Result;

/// Consecutive 308 answers without new persisted bytes before giving up
const MAX_STALLED_CHUNKS: u32 = 5;

/// Resumable upload bound to one signed URL
pub struct ResumableUpload<R> {
    session: Session,
    upload_url: String,
    session_uri: Option<String>,
    source: R,
    base_offset: u64,
    chunk_size: u64,
    content_type: String,
    total_size: Option<u64>,
    bytes_uploaded: u64,
    stalled_chunks: u32,
    finished: bool,
    invalid: bool,
}

impl<R: Read + Seek> ResumableUpload<R> {
    /// `session` should already carry the headers the backend requires
    pub fn new(session: Session, upload_url: impl Into<String>, source: R, chunk_size: u64) -> Result<Self> {
        validate_chunk_size(chunk_size)?;
        Ok(Self {
            session,
            upload_url: upload_url.into(),
            session_uri: None,
            source,
            base_offset: 0,
            chunk_size,
            content_type: String::new(),
            total_size: None,
            bytes_uploaded: 0,
            stalled_chunks: 0,
            finished: false,
            invalid: false,
        })
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn invalid(&self) -> bool {
        self.invalid
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.bytes_uploaded
    }

    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    pub fn session_uri(&self) -> Option<&str> {
        self.session_uri.as_deref()
    }

    /// Open the upload session; content starts at the source's current position.
    pub fn initiate(&mut self, content_type: &str, metadata: Value) -> Result<()> {
        if self.session_uri.is_some() {
            return Err(Error::invalid_request("upload already initiated"));
        }

        self.base_offset = self.source.stream_position()?;
        let end = self.source.seek(SeekFrom::End(0))?;
        self.source.seek(SeekFrom::Start(self.base_offset))?;
        let total = end.saturating_sub(self.base_offset);
        self.total_size = Some(total);
        self.content_type = content_type.to_string();

        let request = TransportRequest::new(Method::Post, self.upload_url.clone())
            .header("content-type", "application/json; charset=UTF-8")
            .header("x-upload-content-type", content_type)
            .header("x-upload-content-length", total.to_string())
            .body(RequestBody::Json(metadata));

        let response = self.session.execute(request)?;
        match response.status() {
            200 | 201 => {
                let uri = response
                    .header("location")
                    .filter(|l| !l.is_empty())
                    .unwrap_or(self.upload_url.as_str())
                    .to_string();
                trace!(session_uri = %uri, "resumable session opened");
                self.session_uri = Some(uri);
                debug!(total, "upload initiated");
                Ok(())
            }
            status => Err(unexpected(status, response, "initiating upload")),
        }
    }

    /// Send the next chunk and update progress from the response
    pub fn transmit_next_chunk(&mut self) -> Result<()> {
        if self.finished {
            return Err(Error::invalid_request("upload has already finished"));
        }
        if self.invalid {
            return Err(Error::invalid_request("upload is in an invalid state, recover first"));
        }
        let uri = self.require_session_uri()?;
        let total = self.total_size.unwrap_or(0);

        let start = self.bytes_uploaded;
        self.source.seek(SeekFrom::Start(self.base_offset + start))?;
        let mut chunk = Vec::with_capacity(self.chunk_size as usize);
        (&mut self.source)
            .take(self.chunk_size)
            .read_to_end(&mut chunk)?;
        let len = chunk.len() as u64;

        let content_range = if len == 0 {
            format!("bytes */{total}")
        } else if start + len >= total {
            format!("bytes {}-{}/{}", start, start + len - 1, total)
        } else {
            format!("bytes {}-{}/*", start, start + len - 1)
        };
        trace!(%content_range, "transmitting chunk");

        let request = TransportRequest::new(Method::Put, uri)
            .header("content-type", self.content_type.clone())
            .header("content-range", content_range)
            .body(RequestBody::Bytes(chunk));

        let response = self.session.execute(request)?;
        match response.status() {
            200 | 201 => {
                self.bytes_uploaded = start + len;
                self.finished = true;
                debug!(bytes = self.bytes_uploaded, "upload finished");
                Ok(())
            }
            308 => match persisted_bytes(response.header("range")) {
                Ok(persisted) if persisted > start => {
                    self.stalled_chunks = 0;
                    self.bytes_uploaded = persisted;
                    Ok(())
                }
                Ok(persisted) => {
                    self.stalled_chunks += 1;
                    self.bytes_uploaded = persisted;
                    if self.stalled_chunks >= MAX_STALLED_CHUNKS {
                        self.invalid = true;
                        return Err(Error::InvalidResponse {
                            message: format!(
                                "storage persisted no new bytes after {} consecutive chunks",
                                self.stalled_chunks
                            ),
                            status_code: Some(308),
                        });
                    }
                    Ok(())
                }
                Err(err) => {
                    self.invalid = true;
                    Err(err)
                }
            },
            status => {
                self.invalid = true;
                Err(unexpected(status, response, "transmitting chunk"))
            }
        }
    }

    /// Ask the backend how much it has and continue from there
    pub fn recover(&mut self) -> Result<()> {
        let uri = self.require_session_uri()?;
        let request = TransportRequest::new(Method::Put, uri).header("content-range", "bytes */*");

        let response = self.session.execute(request)?;
        match response.status() {
            308 => {
                self.bytes_uploaded = persisted_bytes(response.header("range"))?;
                self.source
                    .seek(SeekFrom::Start(self.base_offset + self.bytes_uploaded))?;
                self.invalid = false;
                debug!(bytes = self.bytes_uploaded, "upload recovered");
                Ok(())
            }
            200 | 201 => {
                self.bytes_uploaded = self.total_size.unwrap_or(self.bytes_uploaded);
                self.finished = true;
                self.invalid = false;
                Ok(())
            }
            status => Err(unexpected(status, response, "recovering upload")),
        }
    }

    /// Transmit until finished
    pub fn run(&mut self) -> Result<u64> {
        while !self.finished {
            if self.invalid {
                self.recover()?;
            }
            self.transmit_next_chunk()?;
        }
        Ok(self.bytes_uploaded)
    }

    fn require_session_uri(&self) -> Result<String> {
        self.session_uri
            .clone()
            .ok_or_else(|| Error::invalid_request("upload has not been initiated"))
    }
}

fn unexpected(status: u16, response: TransportResponse, action: &str) -> Error {
    let body = response.text().unwrap_or_default();
    Error::InvalidResponse {
        message: format!("unexpected status {status} while {action}: {body}"),
        status_code: Some(status),
    }
}

/// Upload `source` through a signed upload session and complete it.
/// `name` is sent to the storage backend as the object metadata.
pub fn upload_resumable<R: Read + Seek>(
    client: &Client,
    resource_id: &str,
    name: &str,
    source: R,
    media_type: &str,
) -> Result<Outcome> {
    let resolver = SignedUrlResolver::new(client);
    let upload_session = resolver.start_upload_session(resource_id, media_type)?;

    let content_type = upload_session
        .headers
        .get("content-type")
        .unwrap_or(media_type)
        .to_string();
    let storage = client
        .storage_session()
        .with_headers(upload_session.headers.clone());

    let mut upload = ResumableUpload::new(storage, upload_session.url.clone(), source, DEFAULT_CHUNK_SIZE)?;
    debug!(resource_id, "initiating resumable upload");
    upload.initiate(&content_type, json!({ "name": name }))?;
    let bytes = upload.run()?;
    debug!(resource_id, bytes, "resumable upload transmitted");

    resolver.complete_upload_session(resource_id, &upload_session.session_id)
}

/// Upload `source` straight to the API content endpoint
pub fn upload_api<R>(client: &Client, resource_id: &str, mut source: R, media_type: &str) -> Result<Outcome>
where
    R: Read + Seek + Send + 'static,
{
    let start = source.stream_position()?;
    let end = source.seek(SeekFrom::End(0))?;
    source.seek(SeekFrom::Start(start))?;
    debug!(resource_id, bytes = end - start, "uploading through the API");

    client.dispatch(
        Method::Put,
        &["resources", resource_id, "content"],
        ApiRequest::new()
            .header("content-type", media_type)
            .header("accept", "application/json")
            .reader(Box::new(source), Some(end.saturating_sub(start))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::Headers;
    use crate::http::RetryPolicy;
    use crate::transport::scripted::{reply, reply_with_headers, ScriptedTransport};
    use std::io::Cursor;
    use std::sync::Arc;

    const CHUNK: u64 = 262_144;

    fn session(transport: Arc<ScriptedTransport>) -> Session {
        Session::new(transport, RetryPolicy::none())
            .with_headers(Headers::new().with("Content-Type", "text/csv").with("x-goog-resumable", "start"))
    }

    /// Storage double that persists everything it receives
    fn storage() -> Arc<ScriptedTransport> {
        let mut persisted = 0u64;
        Arc::new(ScriptedTransport::new(move |request| {
            if request.method == Method::Post {
                let headers = Headers::new().with("location", "https://storage/session/1");
                return Ok(reply_with_headers(200, headers, ""));
            }
            let range = request.header("content-range").unwrap_or_default().to_string();
            if range.ends_with("/*") {
                persisted += request.body.as_ref().map_or(0, |b| b.len() as u64);
                let headers = Headers::new().with("range", format!("bytes=0-{}", persisted - 1));
                Ok(reply_with_headers(308, headers, ""))
            } else {
                Ok(reply(200, "{}"))
            }
        }))
    }

    #[test]
    fn test_upload_in_chunks() {
        let data = vec![7u8; CHUNK as usize * 2 + 10];
        let transport = storage();
        let mut upload =
            ResumableUpload::new(session(transport.clone()), "https://storage/signed", Cursor::new(data), CHUNK)
                .unwrap();

        upload.initiate("text/csv", json!({})).unwrap();
        let sent = upload.run().unwrap();

        assert_eq!(sent, CHUNK * 2 + 10);
        assert!(upload.finished());

        let requests = transport.requests();
        assert_eq!(requests.len(), 4);
        assert_eq!(requests[0].header("x-upload-content-type"), Some("text/csv"));
        assert_eq!(requests[0].header("content-type"), Some("text/csv"));
        assert_eq!(requests[0].header("x-goog-resumable"), Some("start"));
        assert_eq!(requests[1].url, "https://storage/session/1");
        assert_eq!(requests[1].header("content-range"), Some("bytes 0-262143/*"));
        assert_eq!(requests[2].header("content-range"), Some("bytes 262144-524287/*"));
        assert_eq!(requests[3].header("content-range"), Some("bytes 524288-524297/524298"));
    }

    #[test]
    fn test_empty_source_sends_empty_final_chunk() {
        let transport = storage();
        let mut upload =
            ResumableUpload::new(session(transport.clone()), "https://storage/signed", Cursor::new(Vec::new()), CHUNK)
                .unwrap();

        upload.initiate("text/csv", json!({})).unwrap();
        upload.run().unwrap();

        let requests = transport.requests();
        assert_eq!(requests[1].header("content-range"), Some("bytes */0"));
    }

    #[test]
    fn test_missing_location_falls_back_to_signed_url() {
        let transport = Arc::new(ScriptedTransport::sequence(vec![Ok(reply(200, ""))]));
        let mut upload =
            ResumableUpload::new(session(transport), "https://storage/signed", Cursor::new(vec![1u8]), CHUNK)
                .unwrap();

        upload.initiate("text/csv", json!({})).unwrap();

        assert_eq!(upload.session_uri(), Some("https://storage/signed"));
    }

    #[test]
    fn test_unexpected_status_marks_upload_invalid() {
        let transport = Arc::new(ScriptedTransport::sequence(vec![
            Ok(reply(200, "")),
            Ok(reply(400, "bad chunk")),
        ]));
        let mut upload =
            ResumableUpload::new(session(transport), "https://storage/signed", Cursor::new(vec![1u8; 10]), CHUNK)
                .unwrap();
        upload.initiate("text/csv", json!({})).unwrap();

        let err = upload.run().unwrap_err();

        assert!(matches!(
            err,
            Error::InvalidResponse {
                status_code: Some(400),
                ..
            }
        ));
        assert!(upload.invalid());
        assert!(!upload.finished());
    }

    #[test]
    fn test_recover_resumes_from_persisted_range() {
        let data: Vec<u8> = (0..(CHUNK as usize + 100)).map(|i| (i % 256) as u8).collect();
        let transport = Arc::new(ScriptedTransport::sequence(vec![
            Ok(reply(200, "")),
            Ok(reply(503, "")),
            Ok(reply_with_headers(
                308,
                Headers::new().with("range", "bytes=0-99"),
                "",
            )),
            Ok(reply_with_headers(
                308,
                Headers::new().with("range", format!("bytes=0-{}", CHUNK + 99)),
                "",
            )),
            Ok(reply(200, "{}")),
        ]));
        let mut upload = ResumableUpload::new(
            session(transport.clone()),
            "https://storage/signed",
            Cursor::new(data),
            CHUNK,
        )
        .unwrap();
        upload.initiate("text/csv", json!({})).unwrap();

        assert!(upload.transmit_next_chunk().is_err());
        upload.recover().unwrap();
        assert_eq!(upload.bytes_uploaded(), 100);
        upload.run().unwrap();

        let requests = transport.requests();
        assert_eq!(requests[2].header("content-range"), Some("bytes */*"));
        assert_eq!(
            requests[3].header("content-range"),
            Some("bytes 100-262243/262244")
        );
        assert_eq!(requests[4].header("content-range"), Some("bytes */262244"));
    }

    #[test]
    fn test_storage_that_never_advances_is_abandoned() {
        let transport = Arc::new(ScriptedTransport::new(|request| {
            if request.method == Method::Post {
                return Ok(reply(200, ""));
            }
            let headers = Headers::new().with("range", "bytes=0-99");
            Ok(reply_with_headers(308, headers, ""))
        }));
        let mut upload = ResumableUpload::new(
            session(transport.clone()),
            "https://storage/signed",
            Cursor::new(vec![1u8; CHUNK as usize * 3]),
            CHUNK,
        )
        .unwrap();
        upload.initiate("text/csv", json!({"name": "data.csv"})).unwrap();

        let err = upload.run().unwrap_err();

        assert!(matches!(
            err,
            Error::InvalidResponse {
                status_code: Some(308),
                ..
            }
        ));
        assert_eq!(upload.bytes_uploaded(), 100);
        // Initiate, the chunk that persisted 100 bytes, then the stalled ones
        assert_eq!(transport.request_count(), 2 + MAX_STALLED_CHUNKS as usize);
        assert_eq!(
            transport.requests()[0].json(),
            Some(json!({"name": "data.csv"}))
        );
    }

    #[test]
    fn test_transmit_before_initiate_is_rejected() {
        let transport = storage();
        let mut upload =
            ResumableUpload::new(session(transport.clone()), "https://storage/signed", Cursor::new(vec![1u8]), CHUNK)
                .unwrap();
        assert!(matches!(
            upload.transmit_next_chunk(),
            Err(Error::InvalidRequest { .. })
        ));
        assert_eq!(transport.request_count(), 0);
    }
}
