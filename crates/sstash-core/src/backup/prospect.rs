use std::collections::BTreeMap;
use std::path::Path;

use sstash_types::error::{Result, SstashError};
use sstash_types::paranoid::ParanoidFile;

/// Rewrites a walked data-dir-relative path to its table-relative manifest
/// path, or drops it. Which rewrite applies depends on what kind of backup
/// is running.
#[derive(Clone, Debug)]
pub enum PathProcessor {
    /// Only files under `<ks>/<table>/backups/`; the `backups` segment is
    /// excised from the manifest path.
    Incremental,
    /// Only files under `<ks>/<table>/snapshots/<name>/`; both segments are
    /// excised.
    Snapshot { name: String },
    /// Live SSTable components: everything except `backups`, `snapshots`,
    /// in-flight `.tmp` files, and per-table metadata files.
    Live,
}

impl PathProcessor {
    pub fn manifest_path(&self, data_rel_path: &str) -> Option<String> {
        let parts: Vec<&str> = data_rel_path.split('/').collect();
        match self {
            PathProcessor::Incremental => {
                if parts.len() < 4 || parts[2] != "backups" {
                    return None;
                }
                let mut restore_parts = Vec::with_capacity(parts.len() - 1);
                restore_parts.extend_from_slice(&parts[0..2]);
                restore_parts.extend_from_slice(&parts[3..]);
                Some(restore_parts.join("/"))
            }
            PathProcessor::Snapshot { name } => {
                if parts.len() < 5 || parts[2] != "snapshots" || parts[3] != name {
                    return None;
                }
                let mut restore_parts = Vec::with_capacity(parts.len() - 2);
                restore_parts.extend_from_slice(&parts[0..2]);
                restore_parts.extend_from_slice(&parts[4..]);
                Some(restore_parts.join("/"))
            }
            PathProcessor::Live => {
                if data_rel_path.ends_with(".tmp") {
                    // Ignore files that are in the process of being written.
                    return None;
                }
                match parts.len() {
                    3 => match parts[2] {
                        "manifest.json" | "schema.cql" => None,
                        _ => Some(data_rel_path.to_string()),
                    },
                    4 => {
                        match parts[2] {
                            "backups" | "snapshots" => return None,
                            _ => {}
                        }
                        match parts[3] {
                            "manifest.json" | "schema.cql" => None,
                            _ => Some(data_rel_path.to_string()),
                        }
                    }
                    _ => None,
                }
            }
        }
    }
}

/// Decides which walk errors are fatal: `None` swallows the error, `Some`
/// propagates it.
pub type WalkErrorFilter = fn(&str, std::io::Error) -> Option<std::io::Error>;

/// Errors on files under `backups/` or `snapshots/` are fatal; a live
/// SSTable component that vanished mid-scan (compaction) is not.
pub fn ignore_live_errors(rel_path: &str, err: std::io::Error) -> Option<std::io::Error> {
    let parts: Vec<&str> = rel_path.split('/').collect();
    match parts.len() {
        3 => {
            if is_sstable_component(parts[2]) && err.kind() == std::io::ErrorKind::NotFound {
                return None;
            }
        }
        4 => {
            match parts[2] {
                "backups" | "snapshots" => return Some(err),
                _ => {}
            }
            if parts[2].ends_with("_index")
                && is_sstable_component(parts[3])
                && err.kind() == std::io::ErrorKind::NotFound
            {
                return None;
            }
        }
        _ => {}
    }
    Some(err)
}

fn is_sstable_component(file_name: &str) -> bool {
    matches!(
        Path::new(file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or(""),
        "txt" | "db" | "crc32" | "sha1"
    )
}

/// Walk the data root and return `manifest path -> paranoid file` for every
/// path the processor accepts. Directory errors are always fatal; file
/// errors go through the filter.
pub fn get_files(
    root: &Path,
    path_processor: &PathProcessor,
    error_filter: WalkErrorFilter,
) -> Result<BTreeMap<String, ParanoidFile>> {
    let mut result = BTreeMap::new();

    for entry in walkdir::WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let rel = e
                    .path()
                    .and_then(|p| p.strip_prefix(root).ok())
                    .map(rel_string)
                    .unwrap_or_default();
                let io_err = std::io::Error::from(e);
                match error_filter(&rel, io_err) {
                    Some(err) => return Err(err.into()),
                    None => continue,
                }
            }
        };
        if entry.file_type().is_dir() {
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(root)
            .map(rel_string)
            .map_err(|e| SstashError::Other(format!("walk produced foreign path: {e}")))?;

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                let io_err = std::io::Error::from(e);
                match error_filter(&rel, io_err) {
                    Some(err) => return Err(err.into()),
                    None => continue,
                }
            }
        };

        if let Some(manifest_path) = path_processor.manifest_path(&rel) {
            result.insert(
                manifest_path,
                ParanoidFile::from_metadata(entry.path().to_path_buf(), &metadata),
            );
        }
    }

    Ok(result)
}

fn rel_string(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
