use std::sync::Arc;
use std::time::Duration;

use sstash_storage::memory::MemoryStore;
use sstash_storage::ObjectStore;

use crate::bucket::{Client, ExistsCache, Layout};
use crate::cache::CacheStorage;

/// A bucket client over an in-memory store with a real (temp-dir) existence
/// cache. The returned temp dir owns the cache files; keep it alive.
pub fn memory_client(lock_duration: Duration) -> (Arc<MemoryStore>, Client, tempfile::TempDir) {
    let store = Arc::new(MemoryStore::new(lock_duration));
    let cache_dir = tempfile::tempdir().unwrap();
    let cache_storage = Arc::new(CacheStorage::open(cache_dir.path().join("kv")).unwrap());
    let exists_cache = ExistsCache::new(cache_storage, false);
    let dyn_store: Arc<dyn ObjectStore> = store.clone();
    let client = Client::new(dyn_store, Layout::default(), exists_cache);
    (store, client, cache_dir)
}
