//! In-memory upload credential cache

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::traits::SessionStore;
use crate::types::UploadDestination;

/// Process-local [`SessionStore`]; concurrent uploads share it freely
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    destinations: RwLock<HashMap<String, UploadDestination>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every cached destination
    pub fn clear(&self) {
        self.destinations.write().clear();
    }
}

impl SessionStore for InMemorySessionStore {
    fn get_upload_destination(&self, bucket_id: &str) -> Option<UploadDestination> {
        self.destinations.read().get(bucket_id).cloned()
    }

    fn set_upload_destination(&self, bucket_id: &str, destination: UploadDestination) {
        self.destinations
            .write()
            .insert(bucket_id.to_string(), destination);
    }

    fn invalidate_upload_destination(&self, bucket_id: &str) {
        self.destinations.write().remove(bucket_id);
    }
}
