//! b2kit-core: Core library for versioned cloud object storage clients
//!
//! This crate provides:
//! - Folder-aware, paginated listing over a flat versioned key space
//! - Upload execution with bounded retry and backoff
//! - The `Transport` and `SessionStore` seams both engines depend on
//! - Engine configuration and cooperative cancellation
//!
//! This crate is designed to be independent of any specific wire protocol,
//! so the engines can be tested against in-memory transports.

pub mod bucket;
pub mod cancel;
pub mod config;
pub mod error;
pub mod listing;
pub mod retry;
pub mod session;
pub mod traits;
pub mod types;
pub mod upload;

pub use bucket::{BucketClient, validate_file_name};
pub use cancel::CancelToken;
pub use config::{EngineConfig, ListingConfig, RetryConfig};
pub use error::{Error, Result, TransportError, TransportErrorKind};
pub use listing::{FolderFilter, ListEntry, ListRequest, Step, list_entries};
pub use retry::{Decision, RetryBuilder, calculate_backoff, decide};
pub use session::InMemorySessionStore;
pub use traits::{SessionStore, Transport};
pub use types::{
    Bucket, FileAction, FileVersionInfo, ListCursor, ListingPage, UploadDestination, UploadSource,
};
pub use upload::UploadEngine;
