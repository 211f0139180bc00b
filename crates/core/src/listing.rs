//! Hierarchical listing over a flat, versioned key space
//!
//! Folders are not stored anywhere. They are derived from `/` in file names
//! while streaming the ordered version listing: the first entry under a folder
//! represents it and every following entry under the same folder is dropped.
//! Only the current folder and the last emitted name are remembered, so memory
//! stays bounded no matter how large the bucket is.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::traits::Transport;
use crate::types::{FileAction, FileVersionInfo, ListCursor};

/// Parameters of one traversal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    pub bucket_id: String,
    /// Folder to list; empty lists the bucket root
    pub path: String,
    pub show_versions: bool,
    /// Records per transport call; never changes the result
    pub page_size: usize,
    /// Emit every entry below `path` instead of collapsing folders
    pub recursive: bool,
    pub max_entries: Option<usize>,
}

impl ListRequest {
    pub fn new(bucket_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bucket_id: bucket_id.into(),
            path: path.into(),
            show_versions: false,
            page_size: 1000,
            recursive: false,
            max_entries: None,
        }
    }

    pub fn show_versions(mut self, show: bool) -> Self {
        self.show_versions = show;
        self
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// The prefix actually sent to the transport
    pub fn query_prefix(&self) -> String {
        if self.path.is_empty() || self.path.ends_with('/') {
            self.path.clone()
        } else {
            format!("{}/", self.path)
        }
    }
}

/// One traversal result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub info: FileVersionInfo,
    /// Set when `info` stands in for a whole folder, e.g. `"bb/2/"`
    pub folder: Option<String>,
}

impl ListEntry {
    pub fn into_parts(self) -> (FileVersionInfo, Option<String>) {
        (self.info, self.folder)
    }
}

/// Outcome of feeding one record to a [`FolderFilter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Emit(ListEntry),
    Skip,
    /// The record is outside the queried prefix; the traversal is over
    Stop,
}

/// Streaming folder-collapsing filter over records ordered by
/// (file name, most recent version first)
#[derive(Debug, Clone)]
pub struct FolderFilter {
    prefix: String,
    show_versions: bool,
    recursive: bool,
    current_folder: Option<String>,
    last_file_name: Option<String>,
}

impl FolderFilter {
    pub fn new(prefix: impl Into<String>, show_versions: bool, recursive: bool) -> Self {
        Self {
            prefix: prefix.into(),
            show_versions,
            recursive,
            current_folder: None,
            last_file_name: None,
        }
    }

    pub fn accept(&mut self, info: FileVersionInfo) -> Step {
        let Some(remainder) = info.file_name.strip_prefix(self.prefix.as_str()) else {
            return Step::Stop;
        };

        let folder = if self.recursive {
            None
        } else {
            remainder
                .find('/')
                .map(|idx| format!("{}{}", self.prefix, &remainder[..=idx]))
        };

        match folder {
            Some(folder) => {
                if self.current_folder.as_deref() == Some(folder.as_str()) {
                    return Step::Skip;
                }
                self.current_folder = Some(folder.clone());
                self.last_file_name = None;
                Step::Emit(ListEntry {
                    info,
                    folder: Some(folder),
                })
            }
            None => {
                self.current_folder = None;
                if self.show_versions {
                    return Step::Emit(ListEntry { info, folder: None });
                }
                if self.last_file_name.as_deref() == Some(info.file_name.as_str()) {
                    return Step::Skip;
                }
                self.last_file_name = Some(info.file_name.clone());
                // A hidden file has no current version
                if info.action == FileAction::Hide {
                    return Step::Skip;
                }
                Step::Emit(ListEntry { info, folder: None })
            }
        }
    }

    /// Where the next page should start given the transport's cursor
    ///
    /// While a folder is being suppressed, everything left inside it would be
    /// dropped anyway, so the next page starts right after the folder.
    pub fn resume_from(&self, next: ListCursor) -> ListCursor {
        match &self.current_folder {
            Some(folder) if next.file_name.starts_with(folder.as_str()) => {
                // '0' is the character right after '/'
                let mut file_name = folder[..folder.len() - 1].to_string();
                file_name.push('0');
                ListCursor {
                    file_name,
                    file_id: None,
                }
            }
            _ => next,
        }
    }
}

struct ListState<T: ?Sized> {
    transport: Arc<T>,
    request: ListRequest,
    prefix: String,
    filter: FolderFilter,
    cursor: Option<ListCursor>,
    emitted: usize,
    done: bool,
    cancel: Option<CancelToken>,
}

/// Lazily traverse `request.path`
///
/// Each transport page is fetched only once the entries of the previous page
/// have been consumed. Calling again restarts from the beginning.
pub fn list_entries<T>(
    transport: Arc<T>,
    request: ListRequest,
    cancel: Option<CancelToken>,
) -> BoxStream<'static, Result<ListEntry>>
where
    T: Transport + ?Sized + 'static,
{
    let prefix = request.query_prefix();
    let state = ListState {
        transport,
        filter: FolderFilter::new(prefix.clone(), request.show_versions, request.recursive),
        prefix,
        cursor: None,
        emitted: 0,
        done: request.max_entries == Some(0),
        cancel,
        request,
    };

    stream::try_unfold(state, next_page)
        .map_ok(|entries| stream::iter(entries.into_iter().map(Ok::<_, Error>)))
        .try_flatten()
        .boxed()
}

async fn next_page<T>(mut state: ListState<T>) -> Result<Option<(Vec<ListEntry>, ListState<T>)>>
where
    T: Transport + ?Sized,
{
    if state.done {
        return Ok(None);
    }
    if state.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
        return Err(Error::Cancelled);
    }

    let page_size = state.request.page_size.max(1);
    let (start_name, start_id) = match &state.cursor {
        Some(cursor) => (Some(cursor.file_name.as_str()), cursor.file_id.as_deref()),
        None => (None, None),
    };

    tracing::debug!(
        bucket_id = %state.request.bucket_id,
        prefix = %state.prefix,
        start_file_name = ?start_name,
        page_size,
        "Fetching listing page"
    );

    let page = state
        .transport
        .list_file_versions(
            &state.request.bucket_id,
            &state.prefix,
            start_name,
            start_id,
            page_size,
        )
        .await?;

    let mut entries = Vec::new();
    for info in page.files {
        match state.filter.accept(info) {
            Step::Emit(entry) => {
                entries.push(entry);
                state.emitted += 1;
                if state.request.max_entries.is_some_and(|max| state.emitted >= max) {
                    state.done = true;
                    break;
                }
            }
            Step::Skip => {}
            Step::Stop => {
                state.done = true;
                break;
            }
        }
    }

    if !state.done {
        match page.next {
            Some(next) => state.cursor = Some(state.filter.resume_from(next)),
            None => state.done = true,
        }
    }

    Ok(Some((entries, state)))
}
