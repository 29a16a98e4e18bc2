//! Folder resources

use std::ops::{Deref, DerefMut};

use crux_core::http::ApiRequest;
use crux_core::{Headers, Method, Result};
use serde::Serialize;
use tracing::debug;

use crate::resource::Resource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum BulkAction {
    Add,
    Delete,
}

/// Body of `permissions/bulk`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BulkPermission<'a> {
    pub identity_id: &'a str,
    pub permission: &'a str,
    pub action: BulkAction,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resource_ids: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<&'a str>,
}

/// Folder resource
#[derive(Debug, Clone)]
pub struct Folder {
    resource: Resource,
}

impl From<Resource> for Folder {
    fn from(resource: Resource) -> Self {
        Self { resource }
    }
}

impl Deref for Folder {
    type Target = Resource;

    fn deref(&self) -> &Resource {
        &self.resource
    }
}

impl DerefMut for Folder {
    fn deref_mut(&mut self) -> &mut Resource {
        &mut self.resource
    }
}

impl Folder {
    pub fn into_resource(self) -> Resource {
        self.resource
    }

    /// Grant `permission` on this folder and everything below it
    pub fn add_permission_recursive(&self, identity_id: &str, permission: &str) -> Result<()> {
        debug!(resource_id = self.id(), identity_id, permission, "adding permission recursively");
        self.bulk(identity_id, permission, BulkAction::Add)
    }

    /// Revoke `permission` from this folder and everything below it
    pub fn delete_permission_recursive(&self, identity_id: &str, permission: &str) -> Result<()> {
        debug!(resource_id = self.id(), identity_id, permission, "deleting permission recursively");
        self.bulk(identity_id, permission, BulkAction::Delete)
    }

    fn bulk(&self, identity_id: &str, permission: &str, action: BulkAction) -> Result<()> {
        let body = BulkPermission {
            identity_id,
            permission,
            action,
            resource_ids: vec![self.id()],
            dataset_id: None,
        };
        self.client().dispatch(
            Method::Post,
            &["permissions", "bulk"],
            ApiRequest::new()
                .headers(&Headers::json())
                .json(serde_json::to_value(&body)?),
        )?;
        Ok(())
    }
}
