//! File resources and their content

use std::fs;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::ops::{Deref, DerefMut};
use std::path::Path;

use crux_core::http::{ApiRequest, Outcome};
use crux_core::signed_url::SignedUrlResolver;
use crux_core::transfer::{
    download_api, download_direct, download_resumable, upload_api, upload_resumable,
};
use crux_core::transport::TransportRequest;
use crux_core::{Error, Method, Result};
use tracing::debug;

use crate::resource::Resource;
use crate::strategy::{DownloadPath, TransferPolicy, UploadPath};
use crate::types::MediaType;

/// File resource
#[derive(Debug, Clone)]
pub struct File {
    resource: Resource,
}

impl From<Resource> for File {
    fn from(resource: Resource) -> Self {
        Self { resource }
    }
}

impl Deref for File {
    type Target = Resource;

    fn deref(&self) -> &Resource {
        &self.resource
    }
}

impl DerefMut for File {
    fn deref_mut(&mut self) -> &mut Resource {
        &mut self.resource
    }
}

impl File {
    pub fn into_resource(self) -> Resource {
        self.resource
    }

    fn crux_only_default(&self) -> bool {
        self.client().config().only_use_crux_domains
    }

    /// Write the file content to `sink`, returning the number of bytes written
    pub fn download_to<W: Write>(&self, sink: &mut W, policy: &TransferPolicy) -> Result<u64> {
        policy.validate()?;

        let client = self.client();
        let resource_id = self.id();
        let path = policy.download_path(self.size(), self.crux_only_default());
        debug!(resource_id, ?path, "downloading file");

        match path {
            DownloadPath::Empty => {
                sink.flush()?;
                Ok(0)
            }
            DownloadPath::Api => download_api(client, resource_id, sink, policy.chunk_size),
            DownloadPath::DirectSignedUrl => {
                download_direct(client, resource_id, sink, policy.chunk_size)
            }
            DownloadPath::ResumableSignedUrl => {
                download_resumable(client, resource_id, sink, policy.chunk_size)
            }
        }
    }

    /// Download into a local file, creating or truncating it
    pub fn download(&self, dest: impl AsRef<Path>, policy: &TransferPolicy) -> Result<u64> {
        policy.validate()?;
        let mut writer = BufWriter::new(fs::File::create(dest)?);
        let written = self.download_to(&mut writer, policy)?;
        writer.flush()?;
        Ok(written)
    }

    /// Open the content as a stream without buffering it
    pub fn read_content(&self, policy: &TransferPolicy) -> Result<Box<dyn Read + Send>> {
        policy.validate()?;
        let client = self.client();
        let resource_id = self.id();
        let capacity = policy.chunk_size as usize;

        if policy.crux_only(self.crux_only_default()) {
            debug!(resource_id, "streaming file through the API");
            let outcome = client.dispatch(
                Method::Get,
                &["resources", resource_id, "content"],
                ApiRequest::new().header("accept", "*/*").stream(true),
            )?;
            return Ok(match outcome {
                Outcome::Response(response) => {
                    Box::new(BufReader::with_capacity(capacity, response.into_reader()))
                }
                Outcome::NoContent => Box::new(std::io::empty()),
            });
        }

        debug!(resource_id, "streaming file from a signed URL");
        let url = SignedUrlResolver::new(client).download_url(resource_id)?;
        let response = client
            .storage_session()
            .execute(TransportRequest::new(Method::Get, url).stream(true))?;
        if response.status() != 200 {
            return Err(Error::Http {
                message: format!("storage answered {} for resource {resource_id}", response.status()),
                status_code: Some(response.status()),
            });
        }
        Ok(Box::new(BufReader::with_capacity(capacity, response.into_reader())))
    }

    /// Upload content from `source`, starting at its current position, then
    /// refresh metadata so the size reflects the new content.
    pub fn upload_from<R>(&mut self, mut source: R, media_type: &str, policy: &TransferPolicy) -> Result<()>
    where
        R: Read + Seek + Send + 'static,
    {
        policy.validate()?;

        let start = source.stream_position()?;
        let end = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(start))?;
        let size = end.saturating_sub(start);

        let path = policy.upload_path(size, self.crux_only_default());
        debug!(resource_id = self.id(), size, ?path, media_type, "uploading file");

        match path {
            UploadPath::Api => upload_api(self.client(), self.id(), source, media_type)?,
            UploadPath::ResumableSignedUrl => {
                upload_resumable(self.client(), self.id(), self.name(), source, media_type)?
            }
        };

        self.refresh()
    }

    /// Upload a local file; the media type is detected from its extension when
    /// not given.
    pub fn upload(&mut self, src: impl AsRef<Path>, media_type: Option<&str>, policy: &TransferPolicy) -> Result<()> {
        let src = src.as_ref();
        let media_type = match media_type {
            Some(media_type) => media_type.to_string(),
            None => MediaType::detect(src)?.as_str().to_string(),
        };
        let file = fs::File::open(src)?;
        self.upload_from(file, &media_type, policy)
    }
}
