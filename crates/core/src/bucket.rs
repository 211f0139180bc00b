//! Caller-facing bucket handle

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::listing::{ListEntry, ListRequest, list_entries};
use crate::traits::{SessionStore, Transport};
use crate::types::{Bucket, FileVersionInfo, UploadSource};
use crate::upload::UploadEngine;

/// Longest file name the service accepts, in bytes
pub const MAX_FILE_NAME_BYTES: usize = 1024;

/// A bucket bound to its transport and credential cache
pub struct BucketClient<T: ?Sized, S: ?Sized> {
    bucket: Bucket,
    transport: Arc<T>,
    uploads: UploadEngine<T, S>,
    config: EngineConfig,
    cancel: Option<CancelToken>,
}

impl<T, S> BucketClient<T, S>
where
    T: Transport + ?Sized + 'static,
    S: SessionStore + ?Sized,
{
    pub fn new(bucket: Bucket, transport: Arc<T>, sessions: Arc<S>, config: EngineConfig) -> Self {
        let uploads = UploadEngine::new(transport.clone(), sessions, config.retry.clone());
        Self {
            bucket,
            transport,
            uploads,
            config,
            cancel: None,
        }
    }

    /// Abort listings and uploads started from this handle once `token` fires
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A listing request for `path` in this bucket with configured defaults
    pub fn list_request(&self, path: &str) -> ListRequest {
        ListRequest::new(&self.bucket.id, path).page_size(self.config.listing.page_size)
    }

    /// List the direct children of `path`, collapsing deeper entries into folders
    ///
    /// `page_size` falls back to the configured default.
    pub fn ls(
        &self,
        path: &str,
        show_versions: bool,
        page_size: Option<usize>,
    ) -> BoxStream<'static, Result<ListEntry>> {
        let mut request = self.list_request(path).show_versions(show_versions);
        if let Some(size) = page_size {
            request = request.page_size(size);
        }
        self.ls_with(request)
    }

    /// List with full control over the request; the bucket id is always this bucket's
    pub fn ls_with(&self, request: ListRequest) -> BoxStream<'static, Result<ListEntry>> {
        let request = ListRequest {
            bucket_id: self.bucket.id.clone(),
            ..request
        };
        list_entries(self.transport.clone(), request, self.cancel.clone())
    }

    pub async fn upload(
        &self,
        source: impl Into<UploadSource>,
        file_name: &str,
    ) -> Result<FileVersionInfo> {
        validate_file_name(file_name)?;
        self.uploads
            .upload(&self.bucket.id, source.into(), file_name, self.cancel.as_ref())
            .await
    }

    pub async fn upload_bytes(
        &self,
        data: impl Into<Bytes>,
        file_name: &str,
    ) -> Result<FileVersionInfo> {
        self.upload(UploadSource::Bytes(data.into()), file_name).await
    }

    pub async fn upload_local_file(
        &self,
        path: impl AsRef<Path>,
        file_name: &str,
    ) -> Result<FileVersionInfo> {
        self.upload(UploadSource::LocalFile(path.as_ref().to_path_buf()), file_name)
            .await
    }
}

/// Reject names the service would refuse before spending an attempt on them
pub fn validate_file_name(file_name: &str) -> Result<()> {
    if file_name.is_empty() {
        return Err(Error::InvalidPath("file name is empty".into()));
    }
    if file_name.len() > MAX_FILE_NAME_BYTES {
        return Err(Error::InvalidPath(format!(
            "file name exceeds {MAX_FILE_NAME_BYTES} bytes"
        )));
    }
    if file_name.starts_with('/') {
        return Err(Error::InvalidPath(format!(
            "file name must not start with '/': {file_name}"
        )));
    }
    if file_name.chars().any(char::is_control) {
        return Err(Error::InvalidPath(
            "file name contains control characters".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_file_name() {
        assert!(validate_file_name("hello.txt").is_ok());
        assert!(validate_file_name("bb/2/sub1").is_ok());

        assert!(matches!(validate_file_name(""), Err(Error::InvalidPath(_))));
        assert!(validate_file_name("/abs").is_err());
        assert!(validate_file_name("tab\there").is_err());
        assert!(validate_file_name(&"x".repeat(MAX_FILE_NAME_BYTES + 1)).is_err());
        assert!(validate_file_name(&"x".repeat(MAX_FILE_NAME_BYTES)).is_ok());
    }
}
