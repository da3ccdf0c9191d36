use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use tracing::{debug, warn};

use sstash_types::error::{Result, SstashError};

/// Persistent local KV store with named sub-caches.
///
/// One handle per process. Sub-caches (`digest`,
/// `bucket_exists/<cluster>/<host>`) are created on demand under a short
/// lock and persist to one file each under the storage root. Load failures
/// start the sub-cache fresh; a cache is an accelerator, not a source of
/// truth.
pub struct CacheStorage {
    root: PathBuf,
    caches: Mutex<HashMap<String, Arc<Cache>>>,
}

impl CacheStorage {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(CacheStorage {
            root,
            caches: Mutex::new(HashMap::new()),
        })
    }

    /// Fetch or create the named sub-cache.
    pub fn cache(&self, name: &str) -> Arc<Cache> {
        let mut caches = self.caches.lock().unwrap();
        if let Some(cache) = caches.get(name) {
            return Arc::clone(cache);
        }
        let cache = Arc::new(Cache::load(self.path_for(name)));
        caches.insert(name.to_string(), Arc::clone(&cache));
        cache
    }

    /// Write all dirty sub-caches back to disk. Called on graceful shutdown.
    pub fn flush(&self) -> Result<()> {
        let caches = self.caches.lock().unwrap();
        for (name, cache) in caches.iter() {
            if let Err(e) = cache.save() {
                warn!(cache = %name, error = %e, "cache flush failed");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Sub-cache names map to file paths segment by segment; segments with
    /// characters unsafe for file names are base64url-encoded.
    fn path_for(&self, name: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in name.split('/') {
            path.push(sanitize_segment(segment));
        }
        path
    }
}

impl Drop for CacheStorage {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, "cache flush on drop failed");
        }
    }
}

fn sanitize_segment(segment: &str) -> String {
    let safe = !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-');
    if safe {
        segment.to_string()
    } else {
        format!("b64-{}", URL_SAFE.encode(segment.as_bytes()))
    }
}

/// A single named KV map, persisted as an rmp-serde file of entry pairs.
pub struct Cache {
    path: PathBuf,
    entries: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl Cache {
    fn load(path: PathBuf) -> Self {
        let entries = match std::fs::read(&path) {
            Ok(data) => match rmp_serde::from_slice::<Vec<(Vec<u8>, Vec<u8>)>>(&data) {
                Ok(pairs) => pairs.into_iter().collect(),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "cache file unreadable, starting fresh");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Cache {
            path,
            entries: Mutex::new(entries),
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        self.entries.lock().unwrap().insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    pub fn save(&self) -> Result<()> {
        let pairs: Vec<(Vec<u8>, Vec<u8>)> = {
            let entries = self.entries.lock().unwrap();
            entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let encoded = rmp_serde::to_vec(&pairs)
            .map_err(|e| SstashError::Serialization(e.to_string()))?;
        write_atomically(&self.path, &encoded)
    }
}

fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| SstashError::Other(format!("cache path has no parent: {}", path.display())))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmp, data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| SstashError::Io(e.error))?;
    Ok(())
}
