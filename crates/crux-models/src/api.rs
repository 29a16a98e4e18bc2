//! Entry point to the platform API

use std::sync::Arc;

use crux_core::http::{ApiRequest, Client};
use crux_core::{ClientConfig, Error, Headers, Method, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::dataset::Dataset;
use crate::resource::{Resource, TypedResource};
use crate::types::{DatasetInfo, Identity, ResourceInfo};

/// Page size of the subscription summary listing
const SUMMARY_PAGE_SIZE: usize = 100;

/// Legacy `drives/my` listing
#[derive(Debug, Default, Deserialize)]
struct Drives {
    #[serde(default)]
    owned: Vec<DatasetInfo>,
    #[serde(default)]
    subscriptions: Vec<DatasetInfo>,
}

/// Root handle; every model it returns shares its client
#[derive(Debug, Clone)]
pub struct Crux {
    client: Arc<Client>,
}

impl Crux {
    pub fn new(config: ClientConfig) -> Result<Self> {
        Ok(Self::with_client(Arc::new(Client::new(config)?)))
    }

    /// Configure from `CRUX_*` environment variables and `.env`
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn with_client(client: Arc<Client>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// Identity behind the configured API key
    pub fn whoami(&self) -> Result<Identity> {
        self.client.call(
            Method::Get,
            &["identities", "whoami"],
            ApiRequest::new().header("accept", "application/json"),
        )
    }

    /// Datasets the caller owns or subscribes to.
    ///
    /// The subscription summary is paged by offset; when it yields nothing
    /// (or answers with an API error) the legacy `drives/my` listing is used,
    /// filtered by `owned` and `subscribed`.
    pub fn list_datasets(&self, owned: bool, subscribed: bool) -> Result<Vec<Dataset>> {
        let mut datasets = Vec::new();
        loop {
            let page: Vec<Value> = match self.client.call_list(
                Method::Get,
                &["v2", "client", "subscriptions", "view", "summary"],
                ApiRequest::new()
                    .header("accept", "application/json")
                    .param("limit", SUMMARY_PAGE_SIZE)
                    .param("offset", datasets.len()),
            ) {
                Ok(page) => page,
                Err(err @ (Error::Api(_) | Error::NotFound(_))) => {
                    debug!(error = %err, "subscription summary unavailable");
                    break;
                }
                Err(err) => return Err(err),
            };

            let count = page.len();
            for mut item in page {
                if let Some(name) = item.get("datasetName").cloned() {
                    item["name"] = name;
                }
                let info: DatasetInfo = serde_json::from_value(item)?;
                datasets.push(Dataset::new(self.client.clone(), info));
            }
            if count < SUMMARY_PAGE_SIZE {
                break;
            }
        }
        if !datasets.is_empty() {
            return Ok(datasets);
        }

        let drives: Drives = self.client.call(
            Method::Get,
            &["drives", "my"],
            ApiRequest::new().header("accept", "application/json"),
        )?;
        let mut infos = Vec::new();
        if owned {
            infos.extend(drives.owned);
        }
        if subscribed {
            infos.extend(drives.subscriptions);
        }
        Ok(infos
            .into_iter()
            .map(|info| Dataset::new(self.client.clone(), info))
            .collect())
    }

    pub fn get_dataset(&self, id: &str) -> Result<Dataset> {
        let info: DatasetInfo = self.client.call(
            Method::Get,
            &["datasets", id],
            ApiRequest::new().headers(&Headers::json()),
        )?;
        Ok(Dataset::new(self.client.clone(), info))
    }

    pub fn create_dataset(&self, name: &str, description: Option<&str>, tags: &[String]) -> Result<Dataset> {
        Dataset::create(self.client.clone(), name, description, tags)
    }

    /// Fetch a resource and wrap it as a file or folder
    pub fn get_resource(&self, id: &str) -> Result<TypedResource> {
        let info: ResourceInfo = self.client.call(
            Method::Get,
            &["resources", id],
            ApiRequest::new().headers(&Headers::json()),
        )?;
        debug!(resource_id = %info.id, kind = ?info.kind, "fetched resource");
        Ok(TypedResource::from_resource(Resource::new(self.client.clone(), info)))
    }

    pub fn list_public_datasets(&self) -> Result<Vec<Dataset>> {
        let infos: Vec<DatasetInfo> = self.client.call_list(
            Method::Get,
            &["datasets", "public"],
            ApiRequest::new().header("accept", "application/json"),
        )?;
        Ok(infos
            .into_iter()
            .map(|info| Dataset::new(self.client.clone(), info))
            .collect())
    }
}
