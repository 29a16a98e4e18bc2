//! Response classification
//!
//! A response is resolved exactly once into a status outcome and, for typed
//! calls, into one of three JSON shapes.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::{ApiErrorBody, Error};
use crate::transport::TransportResponse;
use crate::Result;

/// Statuses that count as success and carry a body
pub const SUCCESS_STATUSES: [u16; 4] = [200, 201, 202, 206];

/// Status-level result of a dispatched call
#[derive(Debug)]
pub enum Outcome {
    /// 2xx with a body, passed through untouched
    Response(TransportResponse),
    /// 204
    NoContent,
}

impl Outcome {
    pub fn is_no_content(&self) -> bool {
        matches!(self, Outcome::NoContent)
    }

    pub fn into_response(self) -> Option<TransportResponse> {
        match self {
            Outcome::Response(response) => Some(response),
            Outcome::NoContent => None,
        }
    }
}

/// Map a raw response onto success, no-content or an API error
pub fn check_status(response: TransportResponse) -> Result<Outcome> {
    let status = response.status();
    if SUCCESS_STATUSES.contains(&status) {
        return Ok(Outcome::Response(response));
    }
    if status == 204 {
        return Ok(Outcome::NoContent);
    }

    let bytes = match response.bytes() {
        Ok(bytes) => bytes,
        Err(err) => {
            debug!(status, error = %err, "could not read error body");
            Vec::new()
        }
    };
    let body = ApiErrorBody::from_bytes(status, &bytes);
    debug!(status, body = %body.body, "API call failed");
    if status == 404 {
        Err(Error::NotFound(body))
    } else {
        Err(Error::Api(body))
    }
}

/// JSON shape of a successful body
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseShape {
    Single(Value),
    List(Vec<Value>),
    Page {
        results: Vec<Value>,
        cursor: Option<String>,
    },
}

impl ResponseShape {
    /// An object with both `results` (array) and `cursor` is a page
    pub fn classify(value: Value) -> Self {
        match value {
            Value::Array(items) => ResponseShape::List(items),
            Value::Object(mut map)
                if map.contains_key("cursor")
                    && map.get("results").map_or(false, Value::is_array) =>
            {
                let cursor = map.remove("cursor").and_then(cursor_string);
                let results = match map.remove("results") {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                ResponseShape::Page { results, cursor }
            }
            other => ResponseShape::Single(other),
        }
    }
}

fn cursor_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Cursor carried between successive paginated calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pagination {
    pub cursor: Option<String>,
}

impl Pagination {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Typed result of a dispatched call
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched<T> {
    One(T),
    Many(Vec<T>),
    Page(Vec<T>),
    /// 204
    NoContent,
}

impl<T> Dispatched<T> {
    /// The single object, failing on any other shape
    pub fn into_one(self) -> Result<T> {
        match self {
            Dispatched::One(item) => Ok(item),
            Dispatched::Many(_) | Dispatched::Page(_) => Err(Error::InvalidResponse {
                message: "expected a single object, got a list".to_string(),
                status_code: None,
            }),
            Dispatched::NoContent => Err(Error::InvalidResponse {
                message: "expected a single object, got no content".to_string(),
                status_code: Some(204),
            }),
        }
    }

    /// Items as a list; a single object becomes a one-element list
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Dispatched::One(item) => vec![item],
            Dispatched::Many(items) | Dispatched::Page(items) => items,
            Dispatched::NoContent => Vec::new(),
        }
    }

    pub fn is_no_content(&self) -> bool {
        matches!(self, Dispatched::NoContent)
    }
}

/// Deserialize a classified body, writing any cursor into `pagination`
pub fn decode<T: DeserializeOwned>(
    shape: ResponseShape,
    pagination: Option<&mut Pagination>,
) -> Result<Dispatched<T>> {
    match shape {
        ResponseShape::Single(value) => Ok(Dispatched::One(serde_json::from_value(value)?)),
        ResponseShape::List(items) => Ok(Dispatched::Many(decode_items(items)?)),
        ResponseShape::Page { results, cursor } => {
            if let Some(pagination) = pagination {
                pagination.cursor = cursor;
            }
            Ok(Dispatched::Page(decode_items(results)?))
        }
    }
}

fn decode_items<T: DeserializeOwned>(items: Vec<Value>) -> Result<Vec<T>> {
    items
        .into_iter()
        .map(|item| serde_json::from_value(item).map_err(Error::from))
        .collect()
}
