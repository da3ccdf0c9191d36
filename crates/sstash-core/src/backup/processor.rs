use std::path::PathBuf;
use std::sync::Mutex;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, info, warn};

use sstash_types::cancel::CancelToken;
use sstash_types::digest::ForUpload;
use sstash_types::error::{Result, SstashError};
use sstash_types::node::NodeIdentity;
use sstash_types::paranoid::ParanoidFile;

use crate::bucket::Client;
use crate::digestcache::DigestCache;
use crate::manifest::{Manifest, ManifestType};

use super::prospect::{get_files, ignore_live_errors, PathProcessor};

const DIGEST_UPLOAD_WORKERS: usize = 4;
const CHANNEL_CAPACITY: usize = 1;

#[derive(Clone, Debug)]
pub struct BackupOptions {
    pub data_dir: PathBuf,
    /// Snapshot name; required when the manifest type is Snapshot.
    pub snapshot_name: Option<String>,
    /// Incremental only: delete the source `backups/` entries after the
    /// manifest has been written.
    pub delete_backups: bool,
}

struct ProspectedFile {
    manifest_path: String,
    file: ParanoidFile,
}

struct UploadedFile {
    manifest_path: String,
    file: ParanoidFile,
    digests: ForUpload,
}

/// Run one backup: walk the data root, digest and upload every accepted
/// file, then finalize the manifest. The manifest is written only after
/// every prospected record uploaded or skipped; a failure anywhere leaves
/// the manifest stream untouched.
pub fn run_backup(
    cancel: &CancelToken,
    client: &Client,
    digest_cache: &DigestCache,
    identity: &NodeIdentity,
    mut manifest: Manifest,
    options: &BackupOptions,
) -> Result<Manifest> {
    let path_processor = match manifest.manifest_type {
        ManifestType::Incremental => PathProcessor::Incremental,
        ManifestType::Snapshot => {
            let name = options.snapshot_name.clone().ok_or_else(|| {
                SstashError::Config("snapshot backups need a snapshot name".into())
            })?;
            PathProcessor::Snapshot { name }
        }
        other => {
            return Err(SstashError::Config(format!(
                "cannot run a backup with manifest type '{other}'"
            )))
        }
    };

    let pipeline = Pipeline {
        cancel,
        client,
        digest_cache,
        identity,
        data_dir: options.data_dir.clone(),
        path_processor,
        first_err: Mutex::new(None),
    };

    let uploaded = pipeline.run();
    cancel.check()?;
    if let Some(e) = pipeline.first_err.into_inner().unwrap() {
        return Err(e);
    }

    for record in &uploaded {
        manifest
            .files
            .insert(record.manifest_path.clone(), record.digests);
    }
    client.put_manifest(cancel, identity, &manifest)?;
    info!(
        identity = %identity,
        manifest = %manifest.key(),
        files = manifest.files.len(),
        "manifest written"
    );

    if manifest.manifest_type == ManifestType::Incremental && options.delete_backups {
        cleanup_sources(&uploaded);
    }

    Ok(manifest)
}

struct Pipeline<'a> {
    cancel: &'a CancelToken,
    client: &'a Client,
    digest_cache: &'a DigestCache,
    identity: &'a NodeIdentity,
    data_dir: PathBuf,
    path_processor: PathProcessor,
    first_err: Mutex<Option<SstashError>>,
}

impl Pipeline<'_> {
    /// One prospector, a digest/upload worker fan-out, and the calling
    /// thread as finalizer, joined by two bounded channels. Workers never
    /// abandon their queue: after a failure they keep draining so the
    /// prospector can't wedge on a full channel.
    fn run(&self) -> Vec<UploadedFile> {
        let (prospected_tx, prospected_rx) = bounded::<ProspectedFile>(CHANNEL_CAPACITY);
        let (uploaded_tx, uploaded_rx) = bounded::<UploadedFile>(CHANNEL_CAPACITY);

        std::thread::scope(|s| {
            for _ in 0..DIGEST_UPLOAD_WORKERS {
                let rx = prospected_rx.clone();
                let tx = uploaded_tx.clone();
                s.spawn(move || self.upload_worker(rx, tx));
            }
            drop(prospected_rx);
            drop(uploaded_tx);

            s.spawn(move || self.prospect(prospected_tx));

            uploaded_rx.iter().collect()
        })
    }

    fn prospect(&self, tx: Sender<ProspectedFile>) {
        let files = match get_files(&self.data_dir, &self.path_processor, ignore_live_errors) {
            Ok(files) => files,
            Err(e) => {
                self.record_error(e);
                return;
            }
        };
        debug!(count = files.len(), "prospected files");
        for (manifest_path, file) in files {
            if self.cancel.is_cancelled() || self.failed() {
                return;
            }
            if tx.send(ProspectedFile { manifest_path, file }).is_err() {
                return;
            }
        }
    }

    fn upload_worker(&self, rx: Receiver<ProspectedFile>, tx: Sender<UploadedFile>) {
        for record in rx.iter() {
            if self.cancel.is_cancelled() || self.failed() {
                continue; // drain
            }
            match self.process_one(record) {
                Ok(uploaded) => {
                    if tx.send(uploaded).is_err() {
                        return;
                    }
                }
                Err(e) => self.record_error(e),
            }
        }
    }

    fn process_one(&self, record: ProspectedFile) -> Result<UploadedFile> {
        let digests = self.digest_cache.get(self.cancel, &record.file)?;
        self.client
            .put_blob(self.cancel, self.identity, &record.file, &digests)?;
        Ok(UploadedFile {
            manifest_path: record.manifest_path,
            file: record.file,
            digests,
        })
    }

    fn failed(&self) -> bool {
        self.first_err.lock().unwrap().is_some()
    }

    fn record_error(&self, e: SstashError) {
        let mut slot = self.first_err.lock().unwrap();
        if slot.is_none() {
            *slot = Some(e);
        }
    }
}

/// The manifest is durable; the flushed incremental sources are now
/// redundant. Deletion failures are not: the next run re-uploads for free.
fn cleanup_sources(uploaded: &[UploadedFile]) {
    for record in uploaded {
        if let Err(e) = std::fs::remove_file(record.file.path()) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %record.file.path().display(), error = %e, "cleanup failed");
            }
        }
    }
}
