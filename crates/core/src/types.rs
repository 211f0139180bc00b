//! Data model shared by the engines and their transports

use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// What a stored version represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAction {
    Upload,
    Hide,
    /// An unfinished multipart upload
    Start,
    Folder,
}

impl std::fmt::Display for FileAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileAction::Upload => write!(f, "upload"),
            FileAction::Hide => write!(f, "hide"),
            FileAction::Start => write!(f, "start"),
            FileAction::Folder => write!(f, "folder"),
        }
    }
}

impl std::str::FromStr for FileAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "upload" => Ok(FileAction::Upload),
            "hide" => Ok(FileAction::Hide),
            "start" => Ok(FileAction::Start),
            "folder" => Ok(FileAction::Folder),
            _ => Err(format!("Invalid file action: {s}")),
        }
    }
}

/// One immutable stored version of a file name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileVersionInfo {
    /// Opaque version id
    pub id: String,

    pub file_name: String,

    pub size: u64,

    pub action: FileAction,

    /// Milliseconds since the Unix epoch
    pub upload_timestamp: i64,
}

impl FileVersionInfo {
    /// Upload time as a timestamp, if the stored value is in range
    pub fn uploaded_at(&self) -> Option<jiff::Timestamp> {
        jiff::Timestamp::from_millisecond(self.upload_timestamp).ok()
    }
}

/// A bucket as seen by the engines; only `id` is used on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub id: String,
    pub name: String,
}

impl Bucket {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Where the next listing page resumes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListCursor {
    pub file_name: String,
    /// Absent means "first version of `file_name`"
    pub file_id: Option<String>,
}

/// One batch of versions returned by a listing call
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    /// Ordered by file name, then most recent version first
    pub files: Vec<FileVersionInfo>,
    /// Present when more data exists
    pub next: Option<ListCursor>,
}

/// Upload endpoint and token for one bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadDestination {
    pub url: String,
    pub token: String,
}

/// Content to upload
#[derive(Debug, Clone)]
pub enum UploadSource {
    Bytes(Bytes),
    LocalFile(PathBuf),
}

impl UploadSource {
    /// Load the whole payload; local files are read once
    pub async fn read(self) -> std::io::Result<Bytes> {
        match self {
            UploadSource::Bytes(data) => Ok(data),
            UploadSource::LocalFile(path) => tokio::fs::read(&path).await.map(Bytes::from),
        }
    }
}

impl From<Vec<u8>> for UploadSource {
    fn from(data: Vec<u8>) -> Self {
        UploadSource::Bytes(Bytes::from(data))
    }
}

impl From<Bytes> for UploadSource {
    fn from(data: Bytes) -> Self {
        UploadSource::Bytes(data)
    }
}

impl From<PathBuf> for UploadSource {
    fn from(path: PathBuf) -> Self {
        UploadSource::LocalFile(path)
    }
}
