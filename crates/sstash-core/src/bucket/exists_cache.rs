use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use sstash_types::digest::ForRestore;
use sstash_types::node::NodeIdentity;
use sstash_types::unixtime::Seconds;

use crate::cache::CacheStorage;
use crate::metrics::bucket_metrics;

/// How close to lock expiry a cached "exists" answer stops being trusted.
/// An object could be deleted the moment its retention lock lapses, so the
/// cache only vouches for blobs locked comfortably into the future.
pub const OBJECT_LOCK_SAFETY_MARGIN: Duration = Duration::from_secs(12 * 3600);

/// Local record of "blob with digest D is known to exist in the bucket,
/// retention-locked until T", namespaced per (cluster, hostname).
///
/// The legacy common-files mode collapses every node into one namespace;
/// reads must still hit it, new deployments should not write under it.
pub struct ExistsCache {
    storage: Option<Arc<CacheStorage>>,
    use_deprecated_common_files: bool,
}

impl ExistsCache {
    pub fn new(storage: Arc<CacheStorage>, use_deprecated_common_files: bool) -> Self {
        ExistsCache {
            storage: Some(storage),
            use_deprecated_common_files,
        }
    }

    /// A cache that never hits, for callers running without local state.
    pub fn disabled() -> Self {
        ExistsCache {
            storage: None,
            use_deprecated_common_files: false,
        }
    }

    fn cache_name(&self, node: &NodeIdentity) -> String {
        if self.use_deprecated_common_files {
            "bucket_exists".to_string()
        } else {
            format!("bucket_exists/{}/{}", node.cluster, node.hostname)
        }
    }

    /// True iff an entry exists whose lock expiry is still at least the
    /// safety margin away. Near-expired entries count as misses.
    pub fn get(&self, node: &NodeIdentity, restore: &ForRestore) -> bool {
        let Some(storage) = &self.storage else {
            return false;
        };
        let cache = storage.cache(&self.cache_name(node));
        let Some(value) = cache.get(&restore.marshal()) else {
            return false;
        };
        let locked_until = match Seconds::from_be_bytes(&value) {
            Ok(seconds) => seconds,
            Err(e) => {
                warn!(digest = %restore, error = %e, "undecodable exists cache entry");
                return false;
            }
        };
        if Seconds::now().add(OBJECT_LOCK_SAFETY_MARGIN) < locked_until {
            true
        } else {
            bucket_metrics().exists_cache_lock_time_misses.inc();
            false
        }
    }

    pub fn put(&self, node: &NodeIdentity, restore: &ForRestore, locked_until: Seconds) {
        let Some(storage) = &self.storage else {
            return;
        };
        let cache = storage.cache(&self.cache_name(node));
        cache.put(restore.marshal().to_vec(), locked_until.to_be_bytes().to_vec());
    }
}
