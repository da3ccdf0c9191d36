use std::collections::BTreeMap;
use std::path::Path;

use tracing::{error, warn};

use sstash_types::cancel::CancelToken;
use sstash_types::digest::ForUpload;
use sstash_types::error::Result;
use sstash_types::paranoid::ParanoidFile;

use crate::backup::{get_files, ignore_live_errors, PathProcessor};
use crate::digestcache::DigestCache;

const FIND_LIVE_ATTEMPTS: u32 = 5;

/// A live file plus its digests, keyed by manifest path.
#[derive(Clone, Debug)]
pub struct ToUpload {
    pub file: ParanoidFile,
    pub digests: ForUpload,
}

/// Inventory the live SSTables on disk with their digests.
///
/// Compaction can race the walk or the digesting, so the whole pass retries
/// a few times before giving up; a clean pass is internally consistent.
pub fn find_live_files(
    cancel: &CancelToken,
    digest_cache: &DigestCache,
    data_dir: &Path,
) -> Result<BTreeMap<String, ToUpload>> {
    let mut attempt = 0;
    loop {
        match find_live_files_once(cancel, digest_cache, data_dir) {
            Ok(result) => return Ok(result),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                if attempt + 1 >= FIND_LIVE_ATTEMPTS {
                    return Err(e);
                }
                warn!(attempt, error = %e, "live file inventory failed, retrying");
                attempt += 1;
            }
        }
    }
}

fn find_live_files_once(
    cancel: &CancelToken,
    digest_cache: &DigestCache,
    data_dir: &Path,
) -> Result<BTreeMap<String, ToUpload>> {
    let files = get_files(data_dir, &PathProcessor::Live, ignore_live_errors).inspect_err(|e| {
        error!(error = %e, "live file walk failed");
    })?;

    let mut result = BTreeMap::new();
    for (manifest_path, file) in files {
        let digests = digest_cache.get(cancel, &file).inspect_err(|e| {
            error!(path = %file.path().display(), error = %e, "live file digest failed");
        })?;
        result.insert(manifest_path, ToUpload { file, digests });
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStorage;

    #[test]
    fn inventories_live_files_with_digests() {
        let data = tempfile::tempdir().unwrap();
        let table = data.path().join("ks/t1-ab");
        std::fs::create_dir_all(table.join("backups")).unwrap();
        std::fs::write(table.join("md-3-big-Data.db"), b"live bytes").unwrap();
        std::fs::write(table.join("backups/md-1-big-Data.db"), b"old").unwrap();

        let cache_dir = tempfile::tempdir().unwrap();
        let storage = CacheStorage::open(cache_dir.path()).unwrap();
        let digest_cache = DigestCache::new(&storage);

        let inventory =
            find_live_files(&CancelToken::never(), &digest_cache, data.path()).unwrap();
        assert_eq!(inventory.len(), 1);
        let entry = inventory.get("ks/t1-ab/md-3-big-Data.db").unwrap();
        assert_eq!(entry.digests.content_length(), 10);
    }
}
