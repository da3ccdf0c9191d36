use std::fs::{File, Metadata};
use std::path::{Path, PathBuf};

use crate::error::{Result, SstashError};

/// A file plus the stat snapshot taken when it was first observed.
///
/// The snapshot doubles as the digest-cache key and as a mutation detector:
/// any operation that depends on the file's contents re-stats and requires
/// equality before trusting a cached digest or a freshly computed one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParanoidFile {
    path: PathBuf,
    size: u64,
    mtime_ns: i64,
    inode: u64,
    device: u64,
    mode: u32,
}

impl ParanoidFile {
    /// Stat `path` and capture its identity.
    pub fn capture(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let metadata = std::fs::metadata(&path)?;
        Ok(Self::from_metadata(path, &metadata))
    }

    /// Build from an already-obtained stat result (walk callbacks).
    pub fn from_metadata(path: PathBuf, metadata: &Metadata) -> Self {
        let (mtime_ns, inode, device, mode) = stat_fields(metadata);
        ParanoidFile {
            path,
            size: metadata.len(),
            mtime_ns,
            inode,
            device,
            mode,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn open(&self) -> std::io::Result<File> {
        File::open(&self.path)
    }

    /// Re-stat the file and require that its identity still matches.
    pub fn verify_unchanged(&self) -> Result<()> {
        let metadata = std::fs::metadata(&self.path)?;
        let (mtime_ns, inode, device, mode) = stat_fields(&metadata);
        let unchanged = metadata.len() == self.size
            && mtime_ns == self.mtime_ns
            && inode == self.inode
            && device == self.device
            && mode == self.mode;
        if !unchanged {
            return Err(SstashError::Changed(self.path.display().to_string()));
        }
        Ok(())
    }

    /// Stable binary encoding of the identity: length-prefixed path followed
    /// by fixed-width stat fields. Used as the digest-cache key.
    pub fn cache_key(&self) -> Vec<u8> {
        let path_bytes = path_bytes(&self.path);
        let mut key = Vec::with_capacity(4 + path_bytes.len() + 8 + 8 + 8 + 8 + 4);
        key.extend_from_slice(&(path_bytes.len() as u32).to_be_bytes());
        key.extend_from_slice(path_bytes);
        key.extend_from_slice(&self.size.to_be_bytes());
        key.extend_from_slice(&self.mtime_ns.to_be_bytes());
        key.extend_from_slice(&self.inode.to_be_bytes());
        key.extend_from_slice(&self.device.to_be_bytes());
        key.extend_from_slice(&self.mode.to_be_bytes());
        key
    }
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> &[u8] {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes()
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> &[u8] {
    path.to_str().map(str::as_bytes).unwrap_or(b"")
}

#[cfg(unix)]
fn stat_fields(metadata: &Metadata) -> (i64, u64, u64, u32) {
    use std::os::unix::fs::MetadataExt;
    (
        metadata.mtime() * 1_000_000_000 + metadata.mtime_nsec(),
        metadata.ino(),
        metadata.dev(),
        metadata.mode(),
    )
}

#[cfg(not(unix))]
fn stat_fields(_metadata: &Metadata) -> (i64, u64, u64, u32) {
    (0, 0, 0, 0o644)
}
