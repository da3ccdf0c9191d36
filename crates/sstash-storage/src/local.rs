use std::fs::File;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use sstash_types::cancel::CancelToken;
use sstash_types::digest::ForUpload;
use sstash_types::error::{Result, SstashError};
use sstash_types::paranoid::ParanoidFile;

use crate::{within_offsets, ObjectAttrs, ObjectStore};

const COPY_BUF_LEN: usize = 128 * 1024;

/// Filesystem-backed object store for development and tests.
///
/// Objects are plain files under a root directory; there is no retention
/// lock, so `lock_duration` is zero and heads never report holds.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root_path: PathBuf = root.into();
        let root = if root_path.exists() {
            std::fs::canonicalize(&root_path)?
        } else {
            root_path
        };
        Ok(LocalStore { root })
    }

    /// Reject keys that could escape the store root.
    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(SstashError::Config("unsafe storage key: empty".into()));
        }
        if key.starts_with('/') || key.contains('\\') {
            return Err(SstashError::Config(format!("unsafe storage key: '{key}'")));
        }
        for component in Path::new(key).components() {
            if component == Component::ParentDir {
                return Err(SstashError::Config(format!(
                    "unsafe storage key: parent traversal '{key}'"
                )));
            }
        }
        Ok(())
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        Self::validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn list_recursive(&self, dir: &Path, keys: &mut Vec<String>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.list_recursive(&entry.path(), keys)?;
            } else if file_type.is_file() {
                if let Ok(rel) = entry.path().strip_prefix(&self.root) {
                    let key = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(key);
                }
            }
        }
        Ok(())
    }
}

impl ObjectStore for LocalStore {
    fn head_object(&self, key: &str) -> Result<ObjectAttrs> {
        let path = self.resolve(key)?;
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(ObjectAttrs::default()),
            Ok(_) => Err(SstashError::NotFound(key.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SstashError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_bytes(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        match std::fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SstashError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_file(&self, cancel: &CancelToken, key: &str, out: &mut File) -> Result<()> {
        let path = self.resolve(key)?;
        let mut source = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SstashError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let mut buf = vec![0u8; COPY_BUF_LEN];
        loop {
            cancel.check()?;
            let n = source.read(&mut buf)?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])?;
        }
        out.flush()?;
        Ok(())
    }

    fn put_bytes(
        &self,
        key: &str,
        _content_type: &str,
        _content_encoding: &str,
        contents: &[u8],
    ) -> Result<ObjectAttrs> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, contents)?;
        Ok(ObjectAttrs::default())
    }

    fn put_file(
        &self,
        cancel: &CancelToken,
        key: &str,
        file: &ParanoidFile,
        digests: &ForUpload,
    ) -> Result<ObjectAttrs> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut source = file.open()?;
        let mut target = File::create(&path)?;
        let mut copied: u64 = 0;
        let mut buf = vec![0u8; COPY_BUF_LEN];
        loop {
            if cancel.check().is_err() {
                drop(target);
                let _ = std::fs::remove_file(&path);
                return Err(SstashError::Cancelled);
            }
            let n = source.read(&mut buf)?;
            if n == 0 {
                break;
            }
            target.write_all(&buf[..n])?;
            copied += n as u64;
        }
        if copied != digests.content_length() {
            drop(target);
            let _ = std::fs::remove_file(&path);
            return Err(SstashError::ShortWrite {
                copied,
                expected: digests.content_length(),
            });
        }
        target.sync_all()?;
        Ok(ObjectAttrs::default())
    }

    fn list_objects(
        &self,
        prefix: &str,
        start_offset: &str,
        end_offset: &str,
    ) -> Result<Vec<String>> {
        let dir = self.root.join(prefix.trim_end_matches('/'));
        let mut keys = Vec::new();
        match std::fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => self.list_recursive(&dir, &mut keys)?,
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        keys.retain(|k| k.starts_with(prefix) && within_offsets(k, start_offset, end_offset));
        keys.sort();
        Ok(keys)
    }

    fn list_prefixes(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.root.join(prefix.trim_end_matches('/'));
        let mut prefixes = Vec::new();
        match std::fs::read_dir(&dir) {
            Ok(entries) => {
                for entry in entries {
                    let entry = entry?;
                    if entry.file_type()?.is_dir() {
                        prefixes.push(format!(
                            "{prefix}{}/",
                            entry.file_name().to_string_lossy()
                        ));
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        prefixes.sort();
        Ok(prefixes)
    }

    fn lock_duration(&self) -> Duration {
        Duration::ZERO
    }
}
