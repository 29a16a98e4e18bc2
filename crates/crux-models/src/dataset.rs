//! Datasets and the resources they contain
//!
//! Listing is lazy: [`Dataset::list_resources`] and
//! [`Dataset::find_resources_by_label`] fetch a page only when the previous
//! one has been consumed.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crux_core::http::{ApiRequest, Client, Outcome, Paginator};
use crux_core::{ApiErrorBody, Error, Headers, Method, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::file::File;
use crate::folder::{BulkAction, BulkPermission, Folder};
use crate::resource::{Resource, TypedResource};
use crate::strategy::TransferPolicy;
use crate::types::{
    join_path, split_path, DatasetInfo, Label, LabelPredicate, Permission, ResourceInfo,
    ResourceKind,
};

/// Filters for [`Dataset::list_resources`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOptions {
    pub folder: String,
    pub cursor: Option<String>,
    /// Total number of resources to return; `None` lists everything
    pub limit: Option<usize>,
    pub include_folders: bool,
    pub sort: Option<String>,
    pub name: Option<String>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            folder: "/".to_string(),
            cursor: None,
            limit: None,
            include_folders: false,
            sort: None,
            name: None,
        }
    }
}

impl ListOptions {
    pub fn in_folder(folder: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
            ..Default::default()
        }
    }

    pub fn cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn include_folders(mut self, include: bool) -> Self {
        self.include_folders = include;
        self
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }
}

/// Metadata and transfer settings applied to uploaded files
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOptions {
    /// Detected from the file extension when unset
    pub media_type: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub policy: TransferPolicy,
}

#[derive(Debug, Default, Deserialize)]
struct SearchPage {
    #[serde(default)]
    results: Vec<ResourceInfo>,
}

/// Most ids sent in one `resources/get-batch` request
pub const BATCH_SIZE: usize = 250;

/// A dataset bound to a client
#[derive(Clone)]
pub struct Dataset {
    client: Arc<Client>,
    info: DatasetInfo,
}

impl Dataset {
    pub fn new(client: Arc<Client>, info: DatasetInfo) -> Self {
        Self { client, info }
    }

    pub(crate) fn create(
        client: Arc<Client>,
        name: &str,
        description: Option<&str>,
        tags: &[String],
    ) -> Result<Self> {
        let info: DatasetInfo = client.call(
            Method::Post,
            &["datasets"],
            ApiRequest::new()
                .headers(&Headers::json())
                .json(json!({"name": name, "description": description, "tags": tags})),
        )?;
        debug!(dataset_id = %info.id, "created dataset");
        Ok(Self::new(client, info))
    }

    pub fn info(&self) -> &DatasetInfo {
        &self.info
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    pub fn refresh(&mut self) -> Result<()> {
        self.info = self.client.call(
            Method::Get,
            &["datasets", self.info.id.as_str()],
            ApiRequest::new().headers(&Headers::json()),
        )?;
        Ok(())
    }

    /// Change name, description or tags; the full metadata is sent back.
    pub fn update(
        &mut self,
        name: Option<String>,
        description: Option<String>,
        tags: Option<Vec<String>>,
    ) -> Result<()> {
        let mut body = self.info.clone();
        if let Some(name) = name {
            body.name = name;
        }
        if let Some(description) = description {
            body.description = Some(description);
        }
        if let Some(tags) = tags {
            body.tags = tags;
        }

        self.info = self.client.call(
            Method::Put,
            &["datasets", self.info.id.as_str()],
            ApiRequest::new()
                .headers(&Headers::json())
                .json(serde_json::to_value(&body)?),
        )?;
        debug!(dataset_id = %self.info.id, "updated dataset");
        Ok(())
    }

    pub fn delete(&self) -> Result<()> {
        self.client.dispatch(
            Method::Delete,
            &["datasets", self.info.id.as_str()],
            ApiRequest::new().headers(&Headers::json()),
        )?;
        Ok(())
    }

    /// Create an empty file resource at `path`
    pub fn create_file(&self, path: &str, tags: &[String], description: Option<&str>) -> Result<File> {
        self.create_resource(path, ResourceKind::File, tags, description)
            .map(File::from)
    }

    pub fn create_folder(&self, path: &str, tags: &[String], description: Option<&str>) -> Result<Folder> {
        self.create_resource(path, ResourceKind::Folder, tags, description)
            .map(Folder::from)
    }

    fn create_resource(
        &self,
        path: &str,
        kind: ResourceKind,
        tags: &[String],
        description: Option<&str>,
    ) -> Result<Resource> {
        let (name, folder) = split_path(path);
        let info: ResourceInfo = self.client.call(
            Method::Post,
            &["datasets", self.info.id.as_str(), "resources"],
            ApiRequest::new().headers(&Headers::json()).json(json!({
                "name": name,
                "type": kind,
                "tags": tags,
                "description": description,
                "folder": folder,
            })),
        )?;
        debug!(dataset_id = %self.info.id, resource_id = %info.id, path, "created resource");
        Ok(Resource::new(self.client.clone(), info))
    }

    pub fn get_file(&self, path: &str) -> Result<File> {
        self.get_resource(path).map(File::from)
    }

    pub fn get_folder(&self, path: &str) -> Result<Folder> {
        self.get_resource(path).map(Folder::from)
    }

    /// Look a resource up by path; the API has no direct path lookup, so this
    /// lists the parent folder filtered by name.
    fn get_resource(&self, path: &str) -> Result<Resource> {
        let (name, folder) = split_path(path);
        let options = ListOptions {
            folder,
            limit: Some(1),
            include_folders: true,
            name: Some(name.clone()),
            ..Default::default()
        };

        match self.list_resources(&options).next() {
            Some(resource) => resource,
            None => Err(Error::NotFound(ApiErrorBody::new(
                404,
                json!({"statusCode": 404, "name": name}),
            ))),
        }
    }

    /// Lazily list resources under a folder
    pub fn list_resources(&self, options: &ListOptions) -> impl Iterator<Item = Result<Resource>> + '_ {
        let mut pages = Paginator::<ResourceInfo>::new(&self.client, &["resources"])
            .param("datasetId", &self.info.id)
            .param("folder", &options.folder)
            .param("includeFolders", options.include_folders)
            .limit(options.limit)
            .cursor(options.cursor.clone());
        if let Some(sort) = &options.sort {
            pages = pages.param("sort", sort);
        }
        if let Some(name) = &options.name {
            pages = pages.param("name", name);
        }

        let client = self.client.clone();
        pages.map(move |info| info.map(|info| Resource::new(client.clone(), info)))
    }

    /// Lazily list the files under a folder, skipping folders
    pub fn list_files(&self, options: &ListOptions) -> impl Iterator<Item = Result<File>> + '_ {
        let options = ListOptions {
            include_folders: false,
            ..options.clone()
        };
        self.list_resources(&options).filter_map(|resource| match resource {
            Ok(resource) if resource.kind() == Some(ResourceKind::File) => Some(Ok(File::from(resource))),
            Ok(_) => None,
            Err(err) => Some(Err(err)),
        })
    }

    /// Fetch file metadata for many ids, [`BATCH_SIZE`] ids per request
    pub fn get_resources_batch(&self, resource_ids: &[&str]) -> Result<Vec<File>> {
        let mut files = Vec::with_capacity(resource_ids.len());
        for ids in resource_ids.chunks(BATCH_SIZE) {
            let infos: Vec<ResourceInfo> = self.client.call_list(
                Method::Post,
                &["resources", "get-batch"],
                ApiRequest::new()
                    .headers(&Headers::json())
                    .param("limit", BATCH_SIZE + 1)
                    .json(json!(ids)),
            )?;
            files.extend(
                infos
                    .into_iter()
                    .map(|info| File::from(Resource::new(self.client.clone(), info))),
            );
        }
        Ok(files)
    }

    /// Create a file resource at `dest` and upload `src` into it. The resource
    /// is deleted again if the upload fails.
    pub fn upload_file(&self, src: impl AsRef<Path>, dest: &str, options: &UploadOptions) -> Result<File> {
        let mut file = self.create_file(dest, &options.tags, options.description.as_deref())?;

        match file.upload(src, options.media_type.as_deref(), &options.policy) {
            Ok(()) => Ok(file),
            Err(err) => {
                warn!(resource_id = file.id(), error = %err, "upload failed, deleting resource");
                if let Err(delete_err) = file.delete() {
                    warn!(resource_id = file.id(), error = %delete_err, "could not delete resource");
                }
                Err(err)
            }
        }
    }

    /// Recursively upload a local directory into `folder`
    pub fn upload_files(&self, local_path: impl AsRef<Path>, folder: &str, options: &UploadOptions) -> Result<Vec<File>> {
        let local_path = local_path.as_ref();
        require_dir(local_path)?;

        let mut entries = fs::read_dir(local_path)?.collect::<std::io::Result<Vec<_>>>()?;
        entries.sort_by_key(|entry| entry.file_name());

        let mut uploaded = Vec::new();
        for entry in entries {
            let local = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let remote = join_path(folder, &name);

            if local.is_dir() {
                self.create_folder(&remote, &options.tags, options.description.as_deref())?;
                debug!(dataset_id = %self.info.id, folder = %remote, "created folder");
                uploaded.extend(self.upload_files(&local, &remote, options)?);
            } else if local.is_file() {
                uploaded.push(self.upload_file(&local, &remote, options)?);
                debug!(dataset_id = %self.info.id, path = %remote, "uploaded file");
            }
        }
        Ok(uploaded)
    }

    /// Recursively download `folder` into a local directory, returning the
    /// paths of the files written.
    pub fn download_files(&self, folder: &str, local_path: impl AsRef<Path>, policy: &TransferPolicy) -> Result<Vec<PathBuf>> {
        let local_path = local_path.as_ref();
        require_dir(local_path)?;

        let options = ListOptions::in_folder(folder).include_folders(true);
        let mut downloaded = Vec::new();
        for resource in self.list_resources(&options) {
            let resource = resource?;
            let name = safe_file_name(resource.name())?;
            let remote = join_path(folder, name);
            let local = local_path.join(name);

            match resource.kind() {
                Some(ResourceKind::Folder) => {
                    fs::create_dir_all(&local)?;
                    debug!(path = %local.display(), "created local directory");
                    downloaded.extend(self.download_files(&remote, &local, policy)?);
                }
                Some(ResourceKind::File) => {
                    File::from(resource).download(&local, policy)?;
                    debug!(path = %local.display(), "downloaded file");
                    downloaded.push(local);
                }
                _ => {}
            }
        }
        Ok(downloaded)
    }

    /// Lazily search resources whose labels match all `predicates`
    pub fn find_resources_by_label(&self, predicates: Vec<LabelPredicate>, max_per_page: usize) -> LabelSearch<'_> {
        LabelSearch {
            dataset: self,
            query: json!({ "basic_query": predicates }),
            max_per_page: max_per_page.max(1),
            after: None,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    pub fn add_label(&self, key: &str, value: &str) -> Result<()> {
        self.client.dispatch(
            Method::Put,
            &["datasets", self.info.id.as_str(), "labels", key, value],
            ApiRequest::new().headers(&Headers::json()),
        )?;
        Ok(())
    }

    pub fn delete_label(&self, key: &str) -> Result<()> {
        self.client.dispatch(
            Method::Delete,
            &["datasets", self.info.id.as_str(), "labels", key],
            ApiRequest::new().headers(&Headers::json()),
        )?;
        Ok(())
    }

    pub fn get_label(&self, key: &str) -> Result<Label> {
        self.client.call(
            Method::Get,
            &["datasets", self.info.id.as_str(), "labels", key],
            ApiRequest::new().headers(&Headers::json()),
        )
    }

    pub fn list_permissions(&self) -> Result<Vec<Permission>> {
        self.client.call_list(
            Method::Get,
            &["datasets", self.info.id.as_str(), "permissions"],
            ApiRequest::new().header("accept", "application/json"),
        )
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

    /// Grant `permission` on the given resources, or on the whole dataset
    /// when `resource_ids` is empty
    pub fn add_permission_to_resources(&self, identity_id: &str, permission: &str, resource_ids: &[&str]) -> Result<()> {
        self.bulk_permission(identity_id, permission, resource_ids, BulkAction::Add)
    }

    /// Revoke `permission` from the given resources, or from the whole
    /// dataset when `resource_ids` is empty
    pub fn delete_permission_from_resources(&self, identity_id: &str, permission: &str, resource_ids: &[&str]) -> Result<()> {
        self.bulk_permission(identity_id, permission, resource_ids, BulkAction::Delete)
    }

    fn bulk_permission(&self, identity_id: &str, permission: &str, resource_ids: &[&str], action: BulkAction) -> Result<()> {
        let body = BulkPermission {
            identity_id,
            permission,
            action,
            resource_ids: resource_ids.to_vec(),
            dataset_id: resource_ids.is_empty().then_some(self.info.id.as_str()),
        };
        debug!(dataset_id = %self.info.id, identity_id, permission, ?action, "bulk permission change");
        self.client.dispatch(
            Method::Post,
            &["permissions", "bulk"],
            ApiRequest::new()
                .headers(&Headers::json())
                .json(serde_json::to_value(&body)?),
        )?;
        Ok(())
    }
}

impl std::fmt::Debug for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dataset")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Lazy iterator over a label search
pub struct LabelSearch<'a> {
    dataset: &'a Dataset,
    query: Value,
    max_per_page: usize,
    after: Option<String>,
    buffer: VecDeque<ResourceInfo>,
    done: bool,
}

impl LabelSearch<'_> {
    fn fetch_page(&mut self) -> Result<()> {
        let mut request = ApiRequest::new()
            .headers(&Headers::json())
            .param("limit", self.max_per_page)
            .json(self.query.clone());
        if let Some(after) = &self.after {
            request = request.param("after", after);
        }

        let outcome = self.dataset.client.dispatch(
            Method::Post,
            &["datasets", self.dataset.id(), "labels", "search"],
            request,
        )?;
        let page = match outcome {
            Outcome::Response(response) => {
                let bytes = response.bytes()?;
                if bytes.iter().all(u8::is_ascii_whitespace) {
                    SearchPage::default()
                } else {
                    serde_json::from_slice(&bytes)?
                }
            }
            Outcome::NoContent => SearchPage::default(),
        };

        match page.results.last() {
            // Stop if the server hands back the same page again
            Some(last) if self.after.as_deref() != Some(last.id.as_str()) => {
                self.after = Some(last.id.clone());
            }
            _ => self.done = true,
        }
        debug!(results = page.results.len(), after = ?self.after, "fetched label search page");
        self.buffer.extend(page.results);
        Ok(())
    }
}

impl Iterator for LabelSearch<'_> {
    type Item = Result<TypedResource>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(info) = self.buffer.pop_front() {
                let resource = Resource::new(self.dataset.client.clone(), info);
                return Some(Ok(TypedResource::from_resource(resource)));
            }
            if self.done {
                return None;
            }
            if let Err(err) = self.fetch_page() {
                self.done = true;
                return Some(Err(err));
            }
        }
    }
}

fn require_dir(path: &Path) -> Result<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(Error::InvalidRequest {
            message: format!("{} is not a valid directory", path.display()),
        })
    }
}

/// Resource names become local path components; refuse anything that
/// would leave the target directory.
fn safe_file_name(name: &str) -> Result<&str> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(Error::InvalidResponse {
            message: format!("refusing to write resource named {name:?} to disk"),
            status_code: None,
        });
    }
    Ok(name)
}
