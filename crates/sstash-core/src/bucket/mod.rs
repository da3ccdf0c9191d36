mod blob;
mod documents;
mod exists_cache;
mod layout;
mod manifests;
mod nodes;

pub use blob::PutBlobOutcome;
pub use exists_cache::{ExistsCache, OBJECT_LOCK_SAFETY_MARGIN};
pub use layout::Layout;

use std::sync::Arc;

use sstash_storage::ObjectStore;

/// Bucket client: the object store plus the key layout and the local
/// existence cache, shared by backup and restore.
pub struct Client {
    store: Arc<dyn ObjectStore>,
    layout: Layout,
    exists_cache: ExistsCache,
}

impl Client {
    pub fn new(store: Arc<dyn ObjectStore>, layout: Layout, exists_cache: ExistsCache) -> Self {
        Client {
            store,
            layout,
            exists_cache,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub(crate) fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub(crate) fn exists_cache(&self) -> &ExistsCache {
        &self.exists_cache
    }
}
