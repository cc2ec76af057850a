//! Process-wide cache of materialized ACL views.
//!
//! Keyed by row id; every mutation path evicts the affected ids before
//! returning. Bulk operations (authority rename) clear the whole cache
//! rather than attempting fine-grained invalidation.

use crate::entry::AclEntryView;
use parking_lot::RwLock;
use reliquary_core::AclId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Memoization of fully-materialized ACL views.
#[derive(Debug, Default)]
pub struct AclCache {
    inner: RwLock<HashMap<AclId, Arc<Vec<AclEntryView>>>>,
}

impl AclCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached view for a row, if present.
    pub fn get(&self, id: AclId) -> Option<Arc<Vec<AclEntryView>>> {
        self.inner.read().get(&id).cloned()
    }

    /// Cache a materialized view.
    pub fn put(&self, id: AclId, view: Arc<Vec<AclEntryView>>) {
        self.inner.write().insert(id, view);
    }

    /// Evict one row's view.
    pub fn evict(&self, id: AclId) {
        if self.inner.write().remove(&id).is_some() {
            debug!(acl = %id, "evicted cached view");
        }
    }

    /// Drop every cached view.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        let dropped = inner.len();
        inner.clear();
        debug!(dropped, "cleared ACL cache");
    }

    /// Number of cached views.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Is the cache empty?
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
