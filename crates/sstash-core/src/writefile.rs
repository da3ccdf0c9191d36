use std::fs::File;
use std::path::{Path, PathBuf};

use sstash_types::error::{Result, SstashError};

/// Atomic-write settings for one managed directory (staging, target,
/// graveyard). Files are written to a temp name in the destination
/// directory, fsynced, then renamed into place, so readers only ever see
/// complete contents.
#[derive(Clone, Debug)]
pub struct WriteConfig {
    pub directory: PathBuf,
    pub directory_mode: u32,
    pub file_mode: u32,
    pub ownership: Option<Ownership>,
}

#[derive(Clone, Copy, Debug)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
}

impl WriteConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        WriteConfig {
            directory: directory.into(),
            directory_mode: 0o755,
            file_mode: 0o644,
            ownership: None,
        }
    }

    pub fn with_ownership(mut self, ownership: Option<Ownership>) -> Self {
        self.ownership = ownership;
        self
    }

    /// Same settings rooted at a different directory (per-file parents).
    pub fn for_directory(&self, directory: impl Into<PathBuf>) -> Self {
        let mut clone = self.clone();
        clone.directory = directory.into();
        clone
    }

    /// Create the directory (and parents) and enforce mode/ownership on it.
    pub fn ensure_directory(&self) -> Result<()> {
        std::fs::create_dir_all(&self.directory)?;
        apply_mode(&self.directory, self.directory_mode)?;
        if let Some(ownership) = self.ownership {
            apply_ownership(&self.directory, ownership)?;
        }
        Ok(())
    }

    /// Write `<directory>/<name>` atomically: `fill` streams into a temp
    /// file, which is fsynced and renamed over the final name. A rename onto
    /// an existing name replaces it, which is safe here because every final
    /// name is content-addressed and verified downstream.
    pub fn write_file(
        &self,
        name: &str,
        fill: impl FnOnce(&mut File) -> Result<()>,
    ) -> Result<()> {
        self.ensure_directory()?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(&self.directory)?;
        fill(tmp.as_file_mut())?;
        tmp.as_file().sync_all()?;

        apply_mode(tmp.path(), self.file_mode)?;
        if let Some(ownership) = self.ownership {
            apply_ownership(tmp.path(), ownership)?;
        }

        let final_path = self.directory.join(name);
        tmp.persist(&final_path).map_err(|e| SstashError::Io(e.error))?;
        Ok(())
    }
}

/// Resolve the numeric uid/gid for a system user, once at startup.
#[cfg(unix)]
pub fn lookup_ownership(user_name: &str) -> Result<Ownership> {
    let user = nix::unistd::User::from_name(user_name)
        .map_err(|e| SstashError::Config(format!("user lookup for '{user_name}': {e}")))?
        .ok_or_else(|| SstashError::Config(format!("no such user: '{user_name}'")))?;
    Ok(Ownership {
        uid: user.uid.as_raw(),
        gid: user.gid.as_raw(),
    })
}

#[cfg(not(unix))]
pub fn lookup_ownership(user_name: &str) -> Result<Ownership> {
    Err(SstashError::Config(format!(
        "ownership enforcement for '{user_name}' requires a unix platform"
    )))
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn apply_ownership(path: &Path, ownership: Ownership) -> Result<()> {
    nix::unistd::chown(
        path,
        Some(nix::unistd::Uid::from_raw(ownership.uid)),
        Some(nix::unistd::Gid::from_raw(ownership.gid)),
    )
    .map_err(|e| {
        SstashError::Other(format!(
            "chown {}:{} on {}: {e}",
            ownership.uid,
            ownership.gid,
            path.display()
        ))
    })
}

#[cfg(not(unix))]
fn apply_ownership(_path: &Path, _ownership: Ownership) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn write_file_lands_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let config = WriteConfig::new(dir.path().join("staging"));
        config
            .write_file("blob", |f| {
                f.write_all(b"payload")?;
                Ok(())
            })
            .unwrap();
        let written = std::fs::read(dir.path().join("staging/blob")).unwrap();
        assert_eq!(written, b"payload");
        // No temp droppings left behind.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("staging"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn failed_fill_leaves_no_final_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = WriteConfig::new(dir.path());
        let result = config.write_file("blob", |f| {
            f.write_all(b"partial")?;
            Err(SstashError::Other("fill failed".into()))
        });
        assert!(result.is_err());
        assert!(!dir.path().join("blob").exists());
    }

    #[test]
    fn write_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let config = WriteConfig::new(dir.path());
        std::fs::write(dir.path().join("blob"), b"old").unwrap();
        config
            .write_file("blob", |f| {
                f.write_all(b"new")?;
                Ok(())
            })
            .unwrap();
        assert_eq!(std::fs::read(dir.path().join("blob")).unwrap(), b"new");
    }

    #[cfg(unix)]
    #[test]
    fn file_mode_is_applied() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let mut config = WriteConfig::new(dir.path());
        config.file_mode = 0o600;
        config
            .write_file("blob", |f| {
                f.write_all(b"x")?;
                Ok(())
            })
            .unwrap();
        let mode = std::fs::metadata(dir.path().join("blob"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
