//! Short-lived storage URLs issued by the API
//!
//! Every URL returned here belongs to a single transfer. Missing fields in a
//! response are reported as [`Error::SignedUrlContract`] and never retried.

use serde_json::{json, Map, Value};
use tracing::{debug, trace};

use crate::error::Error;
use crate::headers::Headers;
use crate::http::{ApiRequest, Client, Outcome};
use crate::transport::Method;
use crate::Result;

/// Upload target handed out by `upload-session-start`
#[derive(Debug, Clone, PartialEq)]
pub struct UploadSession {
    pub url: String,
    /// Headers the storage backend requires on every request of the upload
    pub headers: Headers,
    pub session_id: String,
}

/// Obtains signed URLs and upload sessions for a resource
#[derive(Debug, Clone, Copy)]
pub struct SignedUrlResolver<'a> {
    client: &'a Client,
}

impl<'a> SignedUrlResolver<'a> {
    pub fn new(client: &'a Client) -> Self {
        Self { client }
    }

    /// Fresh download URL for `resource_id`
    pub fn download_url(&self, resource_id: &str) -> Result<String> {
        let body = self.post_json(
            resource_id,
            "content-url",
            ApiRequest::new().headers(&Headers::json()).json(json!({})),
        )?;

        let url = non_empty_str(&body, "url").ok_or_else(|| contract(resource_id, "url"))?;
        debug!(resource_id, "obtained download URL");
        trace!(resource_id, url, "download URL");
        Ok(url.to_string())
    }

    /// Open an upload session for content of `media_type`
    pub fn start_upload_session(&self, resource_id: &str, media_type: &str) -> Result<UploadSession> {
        let request = ApiRequest::new()
            .headers(&Headers::json())
            .header("x-upload-content-type", media_type)
            .json(json!({}));
        let body = self.post_json(resource_id, "upload-session-start", request)?;

        let signed = body
            .get("signedURL")
            .filter(|v| v.is_object())
            .ok_or_else(|| contract(resource_id, "signedURL"))?;

        let url = non_empty_str(signed, "url").ok_or_else(|| contract(resource_id, "signedURL.url"))?;

        let headers = signed
            .get("headers")
            .and_then(Value::as_object)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| contract(resource_id, "signedURL.headers"))?;

        let session_id =
            non_empty_str(&body, "sessionId").ok_or_else(|| contract(resource_id, "sessionId"))?;

        debug!(resource_id, session_id, "upload session started");
        trace!(resource_id, url, "upload URL");

        Ok(UploadSession {
            url: url.to_string(),
            headers: header_map(headers),
            session_id: session_id.to_string(),
        })
    }

    /// Finalize an upload session
    pub fn complete_upload_session(&self, resource_id: &str, session_id: &str) -> Result<Outcome> {
        debug!(resource_id, session_id, "completing upload session");
        self.client.dispatch(
            Method::Post,
            &["resources", resource_id, "upload-session-complete"],
            ApiRequest::new()
                .headers(&Headers::json())
                .json(json!({ "sessionId": session_id })),
        )
    }

    fn post_json(&self, resource_id: &str, action: &str, request: ApiRequest) -> Result<Value> {
        let outcome = self
            .client
            .dispatch(Method::Post, &["resources", resource_id, action], request)?;
        match outcome {
            Outcome::Response(response) => {
                let bytes = response.bytes()?;
                Ok(serde_json::from_slice(&bytes).unwrap_or(Value::Null))
            }
            Outcome::NoContent => Ok(Value::Null),
        }
    }
}

fn non_empty_str<'v>(value: &'v Value, key: &str) -> Option<&'v str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn contract(resource_id: &str, field: &'static str) -> Error {
    Error::SignedUrlContract {
        resource_id: resource_id.to_string(),
        field,
    }
}

fn header_map(headers: &Map<String, Value>) -> Headers {
    headers
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.as_str(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::http::RetryPolicy;
    use crate::transport::scripted::{json_reply, reply, ScriptedTransport};
    use std::sync::Arc;

    fn client(transport: Arc<ScriptedTransport>) -> Client {
        Client::with_transport(ClientConfig::new("k").with_api_host("https://api.test"), transport)
            .with_retry_policy(RetryPolicy::none())
    }

    #[test]
    fn test_download_url() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            Ok(json_reply(200, json!({"url": "https://storage/obj?sig=1"})))
        }));
        let client = client(transport.clone());

        let url = SignedUrlResolver::new(&client).download_url("r1").unwrap();

        assert_eq!(url, "https://storage/obj?sig=1");
        let sent = &transport.requests()[0];
        assert_eq!(sent.method, Method::Post);
        assert_eq!(sent.url, "https://api.test/plat-api/resources/r1/content-url");
        assert_eq!(sent.json(), Some(json!({})));
    }

    #[test]
    fn test_missing_url_is_a_contract_error() {
        let transport = Arc::new(ScriptedTransport::new(|_| Ok(json_reply(200, json!({"url": ""})))));
        let client = client(transport);

        match SignedUrlResolver::new(&client).download_url("r1") {
            Err(Error::SignedUrlContract { resource_id, field }) => {
                assert_eq!(resource_id, "r1");
                assert_eq!(field, "url");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_start_upload_session() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            Ok(json_reply(
                200,
                json!({
                    "signedURL": {
                        "url": "https://storage/upload",
                        "headers": {"Content-Type": "text/csv", "X-Goog-Resumable": "start"}
                    },
                    "sessionId": "s-1"
                }),
            ))
        }));
        let client = client(transport.clone());

        let session = SignedUrlResolver::new(&client)
            .start_upload_session("r1", "text/csv")
            .unwrap();

        assert_eq!(session.url, "https://storage/upload");
        assert_eq!(session.session_id, "s-1");
        assert_eq!(session.headers.get("content-type"), Some("text/csv"));
        assert_eq!(session.headers.get("x-goog-resumable"), Some("start"));
        let sent = &transport.requests()[0];
        assert_eq!(sent.header("x-upload-content-type"), Some("text/csv"));
    }

    #[test]
    fn test_missing_session_id() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            Ok(json_reply(
                200,
                json!({"signedURL": {"url": "https://u", "headers": {"a": "b"}}}),
            ))
        }));
        let client = client(transport);

        let err = SignedUrlResolver::new(&client)
            .start_upload_session("r1", "text/csv")
            .unwrap_err();
        assert!(matches!(
            err,
            Error::SignedUrlContract {
                field: "sessionId",
                ..
            }
        ));
    }

    #[test]
    fn test_complete_upload_session() {
        let transport = Arc::new(ScriptedTransport::new(|_| Ok(reply(204, ""))));
        let client = client(transport.clone());

        let outcome = SignedUrlResolver::new(&client)
            .complete_upload_session("r1", "s-1")
            .unwrap();

        assert!(outcome.is_no_content());
        assert_eq!(transport.requests()[0].json(), Some(json!({"sessionId": "s-1"})));
    }
}
