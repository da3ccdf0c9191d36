use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use md5::{Digest, Md5};

use sstash_types::cancel::CancelToken;
use sstash_types::digest::ForUpload;
use sstash_types::error::{Result, SstashError};
use sstash_types::paranoid::ParanoidFile;
use sstash_types::unixtime::Seconds;

use crate::{within_offsets, ObjectAttrs, ObjectStore};

struct StoredObject {
    data: Vec<u8>,
    content_type: String,
    content_encoding: String,
    attrs: ObjectAttrs,
}

/// In-memory object store used as the test stub and for dry-run plumbing.
///
/// Emulates the retention contract: when constructed with a non-zero lock
/// duration, puts report an event hold and a concrete `locked_until`, and
/// MD5-guarded uploads reject mismatched bytes the way a real bucket would.
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    lock_duration: Duration,
}

impl MemoryStore {
    pub fn new(lock_duration: Duration) -> Self {
        MemoryStore {
            objects: Mutex::new(BTreeMap::new()),
            lock_duration,
        }
    }

    fn attrs_for_new_object(&self) -> ObjectAttrs {
        if self.lock_duration.is_zero() {
            ObjectAttrs::default()
        } else {
            ObjectAttrs {
                event_hold: true,
                locked_until: Seconds::now().add(self.lock_duration),
            }
        }
    }

    /// All keys currently stored (test helper).
    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|o| o.data.clone())
    }

    pub fn content_metadata(&self, key: &str) -> Option<(String, String)> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|o| (o.content_type.clone(), o.content_encoding.clone()))
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().unwrap().is_empty()
    }

    fn insert(&self, key: &str, data: Vec<u8>, content_type: &str, content_encoding: &str) -> ObjectAttrs {
        let attrs = self.attrs_for_new_object();
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
                content_encoding: content_encoding.to_string(),
                attrs,
            },
        );
        attrs
    }
}

impl ObjectStore for MemoryStore {
    fn head_object(&self, key: &str) -> Result<ObjectAttrs> {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .map(|o| o.attrs)
            .ok_or_else(|| SstashError::NotFound(key.to_string()))
    }

    fn get_bytes(&self, key: &str) -> Result<Vec<u8>> {
        self.object(key)
            .ok_or_else(|| SstashError::NotFound(key.to_string()))
    }

    fn get_file(&self, cancel: &CancelToken, key: &str, out: &mut File) -> Result<()> {
        cancel.check()?;
        let data = self.get_bytes(key)?;
        out.write_all(&data)?;
        out.flush()?;
        Ok(())
    }

    fn put_bytes(
        &self,
        key: &str,
        content_type: &str,
        content_encoding: &str,
        contents: &[u8],
    ) -> Result<ObjectAttrs> {
        Ok(self.insert(key, contents.to_vec(), content_type, content_encoding))
    }

    fn put_file(
        &self,
        cancel: &CancelToken,
        key: &str,
        file: &ParanoidFile,
        digests: &ForUpload,
    ) -> Result<ObjectAttrs> {
        cancel.check()?;
        let data = std::fs::read(file.path())?;
        if data.len() as u64 != digests.content_length() {
            return Err(SstashError::ShortWrite {
                copied: data.len() as u64,
                expected: digests.content_length(),
            });
        }
        let mut hasher = Md5::new();
        hasher.update(&data);
        if *hasher.finalize() != digests.md5() {
            return Err(SstashError::Storage(format!(
                "md5 mismatch uploading '{key}'"
            )));
        }
        Ok(self.insert(key, data, "application/octet-stream", ""))
    }

    fn list_objects(
        &self,
        prefix: &str,
        start_offset: &str,
        end_offset: &str,
    ) -> Result<Vec<String>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| within_offsets(k, start_offset, end_offset))
            .cloned()
            .collect())
    }

    fn list_prefixes(&self, prefix: &str) -> Result<Vec<String>> {
        let objects = self.objects.lock().unwrap();
        let mut prefixes: Vec<String> = Vec::new();
        for key in objects.keys() {
            let Some(rest) = key.strip_prefix(prefix) else {
                continue;
            };
            if let Some(slash) = rest.find('/') {
                let candidate = format!("{prefix}{}/", &rest[..slash]);
                if prefixes.last() != Some(&candidate) {
                    prefixes.push(candidate);
                }
            }
        }
        prefixes.dedup();
        Ok(prefixes)
    }

    fn lock_duration(&self) -> Duration {
        self.lock_duration
    }
}
