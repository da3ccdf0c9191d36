use std::io::Read;
use std::sync::Arc;

use tracing::debug;

use sstash_types::cancel::CancelToken;
use sstash_types::digest::{DigestHasher, ForUpload};
use sstash_types::error::Result;
use sstash_types::paranoid::ParanoidFile;

use crate::cache::{Cache, CacheStorage};

const READ_BUF_LEN: usize = 128 * 1024;

/// The digest pipeline: maps a paranoid file identity to its content
/// digests, backed by the persistent `digest` sub-cache.
///
/// A hit is only trusted after the file re-stats equal to the captured
/// identity; a miss streams the file through both hashers in one pass and
/// re-stats again before the result is cached. Cancellation mid-hash leaves
/// no cache entry behind.
pub struct DigestCache {
    cache: Arc<Cache>,
}

impl DigestCache {
    pub fn new(storage: &CacheStorage) -> Self {
        DigestCache {
            cache: storage.cache("digest"),
        }
    }

    pub fn get(&self, cancel: &CancelToken, file: &ParanoidFile) -> Result<ForUpload> {
        file.verify_unchanged()?;

        let key = file.cache_key();
        if let Some(value) = self.cache.get(&key) {
            match ForUpload::unmarshal(&value) {
                Ok(digests) => return Ok(digests),
                Err(e) => {
                    debug!(path = %file.path().display(), error = %e, "discarding undecodable digest cache entry");
                }
            }
        }

        let digests = self.compute(cancel, file)?;
        file.verify_unchanged()?;
        self.cache.put(key, digests.marshal().to_vec());
        Ok(digests)
    }

    fn compute(&self, cancel: &CancelToken, file: &ParanoidFile) -> Result<ForUpload> {
        let mut source = file.open()?;
        let mut hasher = DigestHasher::new();
        let mut buf = vec![0u8; READ_BUF_LEN];
        loop {
            cancel.check()?;
            let n = source.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }
}
