//! Collaborator traits
//!
//! The engines only talk to the storage service through [`Transport`] and only
//! cache upload credentials through [`SessionStore`], so both can be replaced
//! by fakes in tests.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;
use crate::types::{FileVersionInfo, ListingPage, UploadDestination};

/// A single request/response exchange with the storage service
#[async_trait]
pub trait Transport: Send + Sync {
    /// List versions whose names start with `prefix`, resuming at the given
    /// name and id, returning at most `max_count` records
    async fn list_file_versions(
        &self,
        bucket_id: &str,
        prefix: &str,
        start_file_name: Option<&str>,
        start_file_id: Option<&str>,
        max_count: usize,
    ) -> Result<ListingPage, TransportError>;

    /// Request fresh upload credentials for a bucket
    async fn get_upload_url(&self, bucket_id: &str) -> Result<UploadDestination, TransportError>;

    /// Upload the full payload as a new version of `file_name`
    async fn upload_file(
        &self,
        destination: &UploadDestination,
        file_name: &str,
        data: Bytes,
    ) -> Result<FileVersionInfo, TransportError>;
}

/// Per-bucket cache of upload credentials
#[cfg_attr(test, mockall::automock)]
pub trait SessionStore: Send + Sync {
    fn get_upload_destination(&self, bucket_id: &str) -> Option<UploadDestination>;

    fn set_upload_destination(&self, bucket_id: &str, destination: UploadDestination);

    fn invalidate_upload_destination(&self, bucket_id: &str);
}
