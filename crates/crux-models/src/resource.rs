//! Resources of a dataset
//!
//! A [`Resource`] pairs the metadata returned by the API with the client it
//! was fetched through. Files and folders wrap it to add content transfer
//! and recursive permissions.

use std::collections::BTreeMap;
use std::sync::Arc;

use crux_core::http::{ApiRequest, Client};
use crux_core::{Error, Headers, Method, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::file::File;
use crate::folder::Folder;
use crate::types::{Label, Permission, ResourceInfo, ResourceKind};

/// Metadata changes for [`Resource::update`]; unset fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Value>,
}

impl ResourceUpdate {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = Some(tags);
        self
    }

    pub fn provenance(mut self, provenance: Value) -> Self {
        self.provenance = Some(provenance);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.tags.is_none()
            && self.provenance.is_none()
    }
}

#[derive(Deserialize)]
struct UpdatedFields {
    name: Option<String>,
    description: Option<String>,
    tags: Option<Vec<String>>,
    provenance: Option<Value>,
}

#[derive(Deserialize)]
struct FolderPath {
    path: Option<String>,
}

/// A dataset resource bound to a client
#[derive(Clone)]
pub struct Resource {
    client: Arc<Client>,
    info: ResourceInfo,
}

impl Resource {
    pub fn new(client: Arc<Client>, info: ResourceInfo) -> Self {
        Self { client, info }
    }

    pub fn info(&self) -> &ResourceInfo {
        &self.info
    }

    pub fn into_info(self) -> ResourceInfo {
        self.info
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn kind(&self) -> Option<ResourceKind> {
        self.info.kind
    }

    pub fn size(&self) -> Option<u64> {
        self.info.size
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.info.labels
    }

    /// Reload metadata from the API
    pub fn refresh(&mut self) -> Result<()> {
        self.info = self.client.call(
            Method::Get,
            &["resources", self.info.id.as_str()],
            ApiRequest::new().headers(&Headers::json()),
        )?;
        Ok(())
    }

    pub fn delete(&self) -> Result<()> {
        debug!(resource_id = %self.info.id, "deleting resource");
        self.client.dispatch(
            Method::Delete,
            &["resources", self.info.id.as_str()],
            ApiRequest::new().headers(&Headers::json()),
        )?;
        Ok(())
    }

    /// Update metadata, keeping the fields the API echoes back
    pub fn update(&mut self, update: ResourceUpdate) -> Result<()> {
        if update.is_empty() {
            return Err(Error::InvalidRequest {
                message: "Name, Description, Tags or Provenance should be set".to_string(),
            });
        }

        let updated: UpdatedFields = self.client.call(
            Method::Put,
            &["resources", self.info.id.as_str()],
            ApiRequest::new()
                .headers(&Headers::json())
                .json(serde_json::to_value(&update)?),
        )?;

        if let Some(name) = updated.name {
            self.info.name = name;
        }
        if let Some(description) = updated.description {
            self.info.description = Some(description);
        }
        if let (Some(tags), Some(_)) = (updated.tags, &update.tags) {
            self.info.tags = tags;
        }
        if let Some(provenance) = updated.provenance {
            self.info.provenance = Some(provenance);
        }
        Ok(())
    }

    /// Folder holding this resource, as reported by the API
    pub fn folder_path(&self) -> Result<String> {
        let folder: FolderPath = self.client.call(
            Method::Get,
            &["resources", self.info.id.as_str(), "folderpath"],
            ApiRequest::new().headers(&Headers::json()),
        )?;
        folder.path.ok_or_else(|| Error::InvalidResponse {
            message: format!("folder path missing for resource {}", self.info.id),
            status_code: None,
        })
    }

    pub fn add_permission(&self, identity_id: &str, permission: &str) -> Result<Permission> {
        self.client.call(
            Method::Put,
            &["permissions", self.info.id.as_str(), identity_id, permission],
            ApiRequest::new().headers(&Headers::json()),
        )
    }

    pub fn delete_permission(&self, identity_id: &str, permission: &str) -> Result<()> {
        self.client.dispatch(
            Method::Delete,
            &["permissions", self.info.id.as_str(), identity_id, permission],
            ApiRequest::new().headers(&Headers::json()),
        )?;
        Ok(())
    }

    pub fn list_permissions(&self) -> Result<Vec<Permission>> {
        self.client.call_list(
            Method::Get,
            &["resources", self.info.id.as_str(), "permissions"],
            ApiRequest::new().header("accept", "application/json"),
        )
    }

    pub fn add_label(&mut self, key: &str, value: &str) -> Result<()> {
        let dataset_id = self.dataset_id()?;
        self.client.dispatch(
            Method::Put,
            &[
                "datasets",
                dataset_id.as_str(),
                "resources",
                self.info.id.as_str(),
                "labels",
                key,
                value,
            ],
            ApiRequest::new().headers(&Headers::json()),
        )?;
        self.info.labels.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Remove a label; returns whether it was known locally
    pub fn delete_label(&mut self, key: &str) -> Result<bool> {
        let dataset_id = self.dataset_id()?;
        self.client.dispatch(
            Method::Delete,
            &[
                "datasets",
                dataset_id.as_str(),
                "resources",
                self.info.id.as_str(),
                "labels",
                key,
            ],
            ApiRequest::new().headers(&Headers::json()),
        )?;
        Ok(self.info.labels.remove(key).is_some())
    }

    /// Set several labels in one call
    pub fn add_labels(&mut self, labels: &BTreeMap<String, String>) -> Result<()> {
        let dataset_id = self.dataset_id()?;
        let body: Vec<Label> = labels
            .iter()
            .map(|(key, value)| Label {
                label_key: key.clone(),
                label_value: value.clone(),
            })
            .collect();

        self.client.dispatch(
            Method::Put,
            &[
                "datasets",
                dataset_id.as_str(),
                "resources",
                self.info.id.as_str(),
                "labels",
            ],
            ApiRequest::new()
                .headers(&Headers::json())
                .json(json!({ "labels": body })),
        )?;
        self.info
            .labels
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn dataset_id(&self) -> Result<String> {
        self.info
            .dataset_id
            .clone()
            .ok_or_else(|| Error::InvalidRequest {
                message: format!("resource {} has no dataset id", self.info.id),
            })
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// A resource resolved to its concrete kind
#[derive(Debug, Clone)]
pub enum TypedResource {
    File(File),
    Folder(Folder),
    Other(Resource),
}

impl TypedResource {
    pub fn from_resource(resource: Resource) -> Self {
        match resource.kind() {
            Some(ResourceKind::File) => TypedResource::File(File::from(resource)),
            Some(ResourceKind::Folder) => TypedResource::Folder(Folder::from(resource)),
            _ => TypedResource::Other(resource),
        }
    }

    pub fn resource(&self) -> &Resource {
        match self {
            TypedResource::File(file) => &**file,
            TypedResource::Folder(folder) => &**folder,
            TypedResource::Other(resource) => resource,
        }
    }

    pub fn into_file(self) -> Option<File> {
        match self {
            TypedResource::File(file) => Some(file),
            _ => None,
        }
    }

    pub fn into_folder(self) -> Option<Folder> {
        match self {
            TypedResource::Folder(folder) => Some(folder),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crux_core::http::RetryPolicy;
    use crux_core::transport::scripted::{json_reply, reply, ScriptedTransport};
    use crux_core::ClientConfig;

    fn resource(transport: Arc<ScriptedTransport>) -> Resource {
        let config = ClientConfig::new("k").with_api_host("https://api.test");
        let client = Client::with_transport(config, transport).with_retry_policy(RetryPolicy::none());
        let info = ResourceInfo {
            id: "r1".into(),
            dataset_id: Some("d1".into()),
            name: "data.csv".into(),
            kind: Some(ResourceKind::File),
            ..Default::default()
        };
        Resource::new(Arc::new(client), info)
    }

    #[test]
    fn test_update_requires_a_field() {
        let transport = Arc::new(ScriptedTransport::new(|_| Ok(reply(200, "{}"))));
        let mut resource = resource(transport.clone());

        assert!(matches!(
            resource.update(ResourceUpdate::default()),
            Err(Error::InvalidRequest { .. })
        ));
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn test_update_applies_echoed_fields() {
        let transport = Arc::new(ScriptedTransport::new(|_| {
            Ok(json_reply(200, json!({"name": "renamed.csv", "description": "d", "tags": ["t"]})))
        }));
        let mut resource = resource(transport.clone());

        resource
            .update(ResourceUpdate::default().name("renamed.csv").description("d"))
            .unwrap();

        assert_eq!(resource.name(), "renamed.csv");
        assert_eq!(resource.info().description.as_deref(), Some("d"));
        assert!(resource.info().tags.is_empty());
        let sent = &transport.requests()[0];
        assert_eq!(sent.method, Method::Put);
        assert_eq!(sent.json(), Some(json!({"name": "renamed.csv", "description": "d"})));
    }

    #[test]
    fn test_label_round_trip_through_api() {
        let transport = Arc::new(ScriptedTransport::new(|_| Ok(reply(204, ""))));
        let mut resource = resource(transport.clone());

        resource.add_label("source", "vendor a").unwrap();
        assert_eq!(resource.labels().get("source").map(String::as_str), Some("vendor a"));
        assert!(resource.delete_label("source").unwrap());
        assert!(!resource.delete_label("missing").unwrap());

        let requests = transport.requests();
        assert_eq!(
            requests[0].url,
            "https://api.test/plat-api/datasets/d1/resources/r1/labels/source/vendor%20a"
        );
        assert_eq!(requests[1].method, Method::Delete);
    }

    #[test]
    fn test_add_labels_sends_list() {
        let transport = Arc::new(ScriptedTransport::new(|_| Ok(reply(200, "{}"))));
        let mut resource = resource(transport.clone());
        let labels: BTreeMap<String, String> =
            [("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())].into();

        resource.add_labels(&labels).unwrap();

        assert_eq!(resource.labels().len(), 2);
        assert_eq!(
            transport.requests()[0].json(),
            Some(json!({"labels": [
                {"labelKey": "a", "labelValue": "1"},
                {"labelKey": "b", "labelValue": "2"}
            ]}))
        );
    }

    #[test]
    fn test_permissions() {
        let transport = Arc::new(ScriptedTransport::sequence(vec![
            Ok(json_reply(
                200,
                json!({"targetId": "r1", "identityId": "i1", "permissionName": "Read"}),
            )),
            Ok(json_reply(200, json!([{"targetId": "r1", "identityId": "i1", "permissionName": "Read"}]))),
        ]));
        let resource = resource(transport.clone());

        let granted = resource.add_permission("i1", "Read").unwrap();
        let listed = resource.list_permissions().unwrap();

        assert_eq!(granted.permission_name, "Read");
        assert_eq!(listed, vec![granted]);
        assert_eq!(
            transport.requests()[0].url,
            "https://api.test/plat-api/permissions/r1/i1/Read"
        );
    }

    #[test]
    fn test_folder_path() {
        let transport = Arc::new(ScriptedTransport::new(|_| Ok(json_reply(200, json!({"path": "/a/b"})))));
        let resource = resource(transport);

        assert_eq!(resource.folder_path().unwrap(), "/a/b");
    }

    #[test]
    fn test_typed_resource() {
        let transport = Arc::new(ScriptedTransport::new(|_| Ok(reply(200, "{}"))));
        let file = resource(transport);
        let mut folder_info = file.info().clone();
        folder_info.kind = Some(ResourceKind::Folder);
        let folder = Resource::new(file.client().clone(), folder_info);

        assert!(matches!(TypedResource::from_resource(file), TypedResource::File(_)));
        assert!(TypedResource::from_resource(folder).into_folder().is_some());
    }
}
