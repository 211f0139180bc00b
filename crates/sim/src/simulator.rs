//! Simulated storage service
//!
//! Buckets hold versions keyed by `(file_name, id)`. Ids count down from
//! `9999`, so within one name the newest version sorts first, the same order
//! the real service lists them in. Once id `0` has been handed out, further
//! stores fail with a fatal `cap_exceeded` error instead of reusing ids.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use b2kit_core::{
    Bucket, FileAction, FileVersionInfo, ListCursor, ListingPage, Transport, TransportError,
    UploadDestination,
};

const FIRST_FILE_ID: u64 = 9999;

#[derive(Debug, Clone)]
struct StoredFile {
    info: FileVersionInfo,
    data: Bytes,
}

#[derive(Debug, Default)]
struct SimBucket {
    name: String,
    files: BTreeMap<(String, u64), StoredFile>,
}

/// Call counts observed by the simulator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimCounters {
    pub list_calls: u32,
    pub upload_url_requests: u32,
    pub upload_attempts: u32,
}

#[derive(Debug)]
struct SimState {
    buckets: HashMap<String, SimBucket>,
    /// `None` once every id has been used
    next_file_id: Option<u64>,
    next_bucket: u32,
    /// upload token -> bucket id
    upload_tokens: HashMap<String, String>,
    upload_errors: VecDeque<TransportError>,
    list_errors: VecDeque<TransportError>,
    counters: SimCounters,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            buckets: HashMap::new(),
            next_file_id: Some(FIRST_FILE_ID),
            next_bucket: 0,
            upload_tokens: HashMap::new(),
            upload_errors: VecDeque::new(),
            list_errors: VecDeque::new(),
            counters: SimCounters::default(),
        }
    }
}

impl SimState {
    fn bucket_mut(&mut self, bucket_id: &str) -> Result<&mut SimBucket, TransportError> {
        self.buckets.get_mut(bucket_id).ok_or_else(|| bad_bucket(bucket_id))
    }

    fn store(
        &mut self,
        bucket_id: &str,
        file_name: &str,
        action: FileAction,
        data: Bytes,
    ) -> Result<FileVersionInfo, TransportError> {
        let Some(id) = self.next_file_id else {
            return Err(TransportError::from_status(
                403,
                Some("cap_exceeded"),
                "No file ids left in this simulator",
            ));
        };
        let bucket = self.bucket_mut(bucket_id)?;

        let info = FileVersionInfo {
            id: id.to_string(),
            file_name: file_name.to_string(),
            size: data.len() as u64,
            action,
            upload_timestamp: jiff::Timestamp::now().as_millisecond(),
        };
        bucket.files.insert(
            (file_name.to_string(), id),
            StoredFile {
                info: info.clone(),
                data,
            },
        );
        self.next_file_id = id.checked_sub(1);
        Ok(info)
    }
}

fn bad_bucket(bucket_id: &str) -> TransportError {
    TransportError::from_status(
        400,
        Some("bad_bucket_id"),
        format!("Bucket not found: {bucket_id}"),
    )
}

/// In-memory stand-in for the storage service
#[derive(Debug, Default)]
pub struct RawSimulator {
    state: Mutex<SimState>,
    latency: Option<Duration>,
}

impl RawSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every transport call, to make concurrent callers interleave
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Hand out file ids counting down from `id` instead of `9999`
    pub fn with_first_file_id(mut self, id: u64) -> Self {
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .next_file_id = Some(id);
        self
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    pub fn create_bucket(&self, name: &str) -> Bucket {
        let mut state = self.state();
        state.next_bucket += 1;
        let id = format!("bucket_{}", state.next_bucket);
        state.buckets.insert(
            id.clone(),
            SimBucket {
                name: name.to_string(),
                files: BTreeMap::new(),
            },
        );
        Bucket::new(id, name)
    }

    pub fn bucket_name(&self, bucket_id: &str) -> Option<String> {
        self.state().buckets.get(bucket_id).map(|b| b.name.clone())
    }

    /// Queue failures returned by the next upload attempts, in order
    pub fn set_upload_errors(&self, errors: Vec<TransportError>) {
        self.state().upload_errors = errors.into();
    }

    /// Queue failures returned by the next listing calls, in order
    pub fn set_list_errors(&self, errors: Vec<TransportError>) {
        self.state().list_errors = errors.into();
    }

    /// Revoke every issued upload token, as if they had all timed out
    pub fn expire_upload_tokens(&self) {
        self.state().upload_tokens.clear();
    }

    /// Add a hide marker as the newest version of `file_name`
    pub fn hide_file(
        &self,
        bucket_id: &str,
        file_name: &str,
    ) -> Result<FileVersionInfo, TransportError> {
        self.state().store(bucket_id, file_name, FileAction::Hide, Bytes::new())
    }

    /// Content of the newest uploaded version of `file_name`
    pub fn download_file_by_name(&self, bucket_id: &str, file_name: &str) -> Option<Bytes> {
        let state = self.state();
        let bucket = state.buckets.get(bucket_id)?;
        bucket
            .files
            .range((file_name.to_string(), 0)..)
            .take_while(|((name, _), _)| name == file_name)
            .map(|(_, stored)| stored)
            .find(|stored| stored.info.action == FileAction::Upload)
            .map(|stored| stored.data.clone())
    }

    /// Every stored version in listing order
    pub fn all_versions(&self, bucket_id: &str) -> Vec<FileVersionInfo> {
        self.state()
            .buckets
            .get(bucket_id)
            .map(|b| b.files.values().map(|f| f.info.clone()).collect())
            .unwrap_or_default()
    }

    pub fn counters(&self) -> SimCounters {
        self.state().counters
    }
}

#[async_trait]
impl Transport for RawSimulator {
    async fn list_file_versions(
        &self,
        bucket_id: &str,
        prefix: &str,
        start_file_name: Option<&str>,
        start_file_id: Option<&str>,
        max_count: usize,
    ) -> Result<ListingPage, TransportError> {
        self.delay().await;
        let mut state = self.state();
        state.counters.list_calls += 1;

        if let Some(err) = state.list_errors.pop_front() {
            tracing::debug!(bucket_id, error = %err, "Injecting listing error");
            return Err(err);
        }
        if max_count == 0 {
            return Err(TransportError::from_status(
                400,
                Some("bad_request"),
                "maxFileCount out of range: 0",
            ));
        }

        let start_id = match start_file_id {
            Some(id) => id.parse::<u64>().map_err(|_| {
                TransportError::from_status(
                    400,
                    Some("bad_request"),
                    format!("Invalid fileId: {id}"),
                )
            })?,
            None => 0,
        };
        let start_name = match start_file_name {
            Some(name) if name > prefix => name,
            _ => prefix,
        };
        let start_id = if start_file_name == Some(start_name) { start_id } else { 0 };

        let bucket = state.bucket_mut(bucket_id)?;
        let mut matching = bucket
            .files
            .range((start_name.to_string(), start_id)..)
            .take_while(|((name, _), _)| name.starts_with(prefix));

        let files: Vec<FileVersionInfo> = matching
            .by_ref()
            .take(max_count)
            .map(|(_, stored)| stored.info.clone())
            .collect();
        let next = matching.next().map(|((name, id), _)| ListCursor {
            file_name: name.clone(),
            file_id: Some(id.to_string()),
        });

        Ok(ListingPage { files, next })
    }

    async fn get_upload_url(&self, bucket_id: &str) -> Result<UploadDestination, TransportError> {
        self.delay().await;
        let mut state = self.state();
        state.counters.upload_url_requests += 1;
        state.bucket_mut(bucket_id)?;

        let n = state.counters.upload_url_requests;
        let destination = UploadDestination {
            url: format!("https://upload.sim.invalid/{bucket_id}/{n}"),
            token: format!("upload_token_{n}"),
        };
        state
            .upload_tokens
            .insert(destination.token.clone(), bucket_id.to_string());
        Ok(destination)
    }

    async fn upload_file(
        &self,
        destination: &UploadDestination,
        file_name: &str,
        data: Bytes,
    ) -> Result<FileVersionInfo, TransportError> {
        self.delay().await;
        let mut state = self.state();
        state.counters.upload_attempts += 1;

        if let Some(err) = state.upload_errors.pop_front() {
            tracing::debug!(file_name, error = %err, "Injecting upload error");
            return Err(err);
        }

        let Some(bucket_id) = state.upload_tokens.get(&destination.token).cloned() else {
            return Err(TransportError::from_status(
                401,
                Some("expired_auth_token"),
                "Upload token expired or unknown",
            ));
        };

        state.store(&bucket_id, file_name, FileAction::Upload, data)
    }
}
