//! Wire types for platform resources
//!
//! Field names follow the API's camelCase JSON. Resource labels travel as a
//! list of `{labelKey, labelValue}` pairs and are held as a map in memory.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use crux_core::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error as ThisError;

/// Kind of a dataset resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    File,
    Folder,
    #[serde(other)]
    Other,
}

/// Resource metadata as returned by `resources/{id}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    #[serde(rename = "resourceId")]
    pub id: String,

    #[serde(default)]
    pub dataset_id: Option<String>,

    #[serde(default)]
    pub folder_id: Option<String>,

    /// Folder path, only present on some responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,

    #[serde(default)]
    pub name: String,

    /// Content length; absent until content is uploaded
    #[serde(default, deserialize_with = "size::deserialize")]
    pub size: Option<u64>,

    #[serde(rename = "type", default)]
    pub kind: Option<ResourceKind>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub media_type: Option<String>,

    #[serde(default)]
    pub storage_id: Option<String>,

    #[serde(default)]
    pub config: Option<Value>,

    #[serde(default)]
    pub provenance: Option<Value>,

    #[serde(default)]
    pub as_of: Option<String>,

    #[serde(default)]
    pub created_at: Option<String>,

    #[serde(default)]
    pub modified_at: Option<String>,

    #[serde(default, deserialize_with = "nullable_vec")]
    pub tags: Vec<String>,

    #[serde(default, with = "labels")]
    pub labels: BTreeMap<String, String>,
}

impl ResourceInfo {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.created_at.as_deref())
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.modified_at.as_deref())
    }

    /// Whether there is any content to transfer
    pub fn has_content(&self) -> bool {
        self.size.is_some_and(|size| size > 0)
    }
}

/// Dataset metadata as returned by `datasets/{id}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetInfo {
    #[serde(rename = "datasetId")]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default, deserialize_with = "nullable_vec")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_identity_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_identity_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
}

impl DatasetInfo {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.created_at.as_deref())
    }

    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.modified_at.as_deref())
    }
}

/// The caller as seen by `identities/whoami`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(rename = "identityId")]
    pub id: String,
    #[serde(default)]
    pub parent_identity_id: Option<String>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub landing_page: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// Grant of a permission to an identity on a resource or dataset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    #[serde(default)]
    pub target_id: String,
    #[serde(default)]
    pub identity_id: String,
    #[serde(default)]
    pub permission_name: String,
}

/// Key/value label attached to a dataset or resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Label {
    pub label_key: String,
    pub label_value: String,
}

/// Predicate of a label search
///
/// Serializes to the `{"op": "eq", "key": ..., "val": ...}` form expected by
/// `datasets/{id}/labels/search`. Comparisons are lexicographical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum LabelPredicate {
    Eq { key: String, val: String },
    Ne { key: String, val: String },
    Lt { key: String, val: String },
    Lte { key: String, val: String },
    Gt { key: String, val: String },
    Gte { key: String, val: String },
    Or {
        #[serde(rename = "in")]
        predicates: Vec<LabelPredicate>,
    },
    And {
        #[serde(rename = "in")]
        predicates: Vec<LabelPredicate>,
    },
}

impl LabelPredicate {
    pub fn eq(key: impl Into<String>, val: impl Into<String>) -> Self {
        LabelPredicate::Eq {
            key: key.into(),
            val: val.into(),
        }
    }

    pub fn ne(key: impl Into<String>, val: impl Into<String>) -> Self {
        LabelPredicate::Ne {
            key: key.into(),
            val: val.into(),
        }
    }

    pub fn lt(key: impl Into<String>, val: impl Into<String>) -> Self {
        LabelPredicate::Lt {
            key: key.into(),
            val: val.into(),
        }
    }

    pub fn lte(key: impl Into<String>, val: impl Into<String>) -> Self {
        LabelPredicate::Lte {
            key: key.into(),
            val: val.into(),
        }
    }

    pub fn gt(key: impl Into<String>, val: impl Into<String>) -> Self {
        LabelPredicate::Gt {
            key: key.into(),
            val: val.into(),
        }
    }

    pub fn gte(key: impl Into<String>, val: impl Into<String>) -> Self {
        LabelPredicate::Gte {
            key: key.into(),
            val: val.into(),
        }
    }

    pub fn any(predicates: Vec<LabelPredicate>) -> Self {
        LabelPredicate::Or { predicates }
    }

    pub fn all(predicates: Vec<LabelPredicate>) -> Self {
        LabelPredicate::And { predicates }
    }
}

/// Media types the platform recognizes by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Json,
    Ndjson,
    Csv,
    Parquet,
    Avro,
}

/// File extension without a known media type
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
#[error("File/Media Type not supported: {path}")]
pub struct UnsupportedMediaType {
    pub path: String,
}

impl From<UnsupportedMediaType> for Error {
    fn from(err: UnsupportedMediaType) -> Self {
        Error::InvalidRequest {
            message: err.to_string(),
        }
    }
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Json => "application/json",
            MediaType::Ndjson => "application/x-ndjson",
            MediaType::Csv => "text/csv",
            MediaType::Parquet => "application/parquet",
            MediaType::Avro => "avro/binary",
        }
    }

    /// Media type from the extension of `path`, case-insensitively
    pub fn detect(path: impl AsRef<Path>) -> Result<Self, UnsupportedMediaType> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match ext.as_deref() {
            Some("json") => Ok(MediaType::Json),
            Some("ndjson") => Ok(MediaType::Ndjson),
            Some("csv") => Ok(MediaType::Csv),
            Some("parquet") => Ok(MediaType::Parquet),
            Some("avro") => Ok(MediaType::Avro),
            _ => Err(UnsupportedMediaType {
                path: path.display().to_string(),
            }),
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split a POSIX path into `(name, folder)`; the folder defaults to `/`.
pub fn split_path(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some((dir, name)) => {
            let dir = dir.trim_end_matches('/');
            let dir = if dir.is_empty() { "/" } else { dir };
            (name.to_string(), dir.to_string())
        }
        None => (path.to_string(), "/".to_string()),
    }
}

/// Join a folder and a child name with exactly one `/` between them
pub fn join_path(folder: &str, name: &str) -> String {
    if folder.ends_with('/') {
        format!("{folder}{name}")
    } else {
        format!("{folder}/{name}")
    }
}

fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn nullable_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

mod size {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawSize {
        Number(u64),
        Text(String),
    }

    /// Accept the size as a number, a numeric string or null
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<RawSize>::deserialize(deserializer)? {
            None => Ok(None),
            Some(RawSize::Number(n)) => Ok(Some(n)),
            Some(RawSize::Text(s)) if s.trim().is_empty() => Ok(None),
            Some(RawSize::Text(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

mod labels {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serializer};

    use super::Label;

    pub fn serialize<S>(labels: &BTreeMap<String, String>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(labels.iter().map(|(key, value)| Label {
            label_key: key.clone(),
            label_value: value.clone(),
        }))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let labels = Option::<Vec<Label>>::deserialize(deserializer)?.unwrap_or_default();
        Ok(labels
            .into_iter()
            .map(|label| (label.label_key, label.label_value))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resource_info_from_api_payload() {
        let info: ResourceInfo = serde_json::from_value(json!({
            "resourceId": "r1",
            "datasetId": "d1",
            "folderId": "f1",
            "name": "data.csv",
            "size": "1024",
            "type": "file",
            "mediaType": "text/csv",
            "tags": ["a"],
            "labels": [{"labelKey": "k", "labelValue": "v"}],
            "createdAt": "2020-01-02T03:04:05Z",
            "provenance": null
        }))
        .unwrap();

        assert_eq!(info.id, "r1");
        assert_eq!(info.size, Some(1024));
        assert_eq!(info.kind, Some(ResourceKind::File));
        assert_eq!(info.labels.get("k").map(String::as_str), Some("v"));
        assert_eq!(info.created_at().unwrap().timestamp(), 1_577_934_245);
        assert!(info.modified_at().is_none());
    }

    #[test]
    fn test_size_variants() {
        let numeric: ResourceInfo = serde_json::from_value(json!({"resourceId": "a", "size": 7})).unwrap();
        let missing: ResourceInfo = serde_json::from_value(json!({"resourceId": "a"})).unwrap();
        let null: ResourceInfo = serde_json::from_value(json!({"resourceId": "a", "size": null})).unwrap();

        assert_eq!(numeric.size, Some(7));
        assert!(missing.size.is_none() && !missing.has_content());
        assert!(null.size.is_none());
        assert!(serde_json::from_value::<ResourceInfo>(json!({"resourceId": "a", "size": "big"})).is_err());
    }

    #[test]
    fn test_labels_serialize_as_list() {
        let mut info = ResourceInfo {
            id: "r1".into(),
            ..Default::default()
        };
        info.labels.insert("k".into(), "v".into());

        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["labels"], json!([{"labelKey": "k", "labelValue": "v"}]));
        assert_eq!(value["resourceId"], json!("r1"));
    }

    #[test]
    fn test_unknown_kind() {
        let info: ResourceInfo =
            serde_json::from_value(json!({"resourceId": "t", "type": "table"})).unwrap();
        assert_eq!(info.kind, Some(ResourceKind::Other));
    }

    #[test]
    fn test_predicates_serialize_with_op_tag() {
        let predicate = LabelPredicate::any(vec![
            LabelPredicate::eq("key1", "abcd"),
            LabelPredicate::gte("key2", "abc"),
        ]);

        assert_eq!(
            serde_json::to_value(&predicate).unwrap(),
            json!({"op": "or", "in": [
                {"op": "eq", "key": "key1", "val": "abcd"},
                {"op": "gte", "key": "key2", "val": "abc"}
            ]})
        );
    }

    #[test]
    fn test_media_type_detection() {
        assert_eq!(MediaType::detect("a/b/data.CSV").unwrap(), MediaType::Csv);
        assert_eq!(MediaType::detect("x.ndjson").unwrap().as_str(), "application/x-ndjson");
        assert_eq!(MediaType::detect("x.avro").unwrap().as_str(), "avro/binary");
        assert!(MediaType::detect("x.txt").is_err());
        assert!(MediaType::detect("noext").is_err());
    }

    #[test]
    fn test_split_and_join_paths() {
        assert_eq!(split_path("/a/b/c.csv"), ("c.csv".into(), "/a/b".into()));
        assert_eq!(split_path("/c.csv"), ("c.csv".into(), "/".into()));
        assert_eq!(split_path("c.csv"), ("c.csv".into(), "/".into()));
        assert_eq!(join_path("/", "x"), "/x");
        assert_eq!(join_path("/a", "x"), "/a/x");
    }
}
