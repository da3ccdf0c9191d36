use std::fs::File;
use std::io::{Seek, SeekFrom};

use sstash_storage::{ObjectAttrs, ObjectStore};
use sstash_types::cancel::CancelToken;
use sstash_types::digest::{ForRestore, ForUpload};
use sstash_types::error::{Result, SstashError};
use sstash_types::node::NodeIdentity;
use sstash_types::paranoid::ParanoidFile;
use sstash_types::unixtime::Seconds;

use crate::metrics::bucket_metrics;

use super::Client;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutBlobOutcome {
    Uploaded,
    /// The blob already exists in the bucket; no bytes were sent.
    Skipped,
}

impl Client {
    /// Upload-if-absent: consult the existence cache, then head, then put
    /// with the MD5 guard. A hit anywhere short-circuits to `Skipped`.
    pub fn put_blob(
        &self,
        cancel: &CancelToken,
        node: &NodeIdentity,
        file: &ParanoidFile,
        digests: &ForUpload,
    ) -> Result<PutBlobOutcome> {
        let metrics = bucket_metrics();
        match self.blob_exists(node, &digests.for_restore()) {
            Err(e) => {
                metrics.upload_errors.inc();
                return Err(e);
            }
            Ok(true) => {
                metrics.skipped_files.inc();
                metrics.skipped_bytes.inc_by(file.len());
                return Ok(PutBlobOutcome::Skipped);
            }
            Ok(false) => {}
        }

        let key = self
            .layout()
            .absolute_key_for_blob(node, &digests.for_restore());
        match self.store().put_file(cancel, &key, file, digests) {
            Err(e) => {
                metrics.upload_errors.inc();
                if cancel.is_cancelled() {
                    Err(SstashError::Cancelled)
                } else {
                    Err(e)
                }
            }
            Ok(attrs) => {
                self.update_exists_cache(node, &digests.for_restore(), attrs);
                metrics.uploaded_files.inc();
                metrics.uploaded_bytes.inc_by(file.len());
                Ok(PutBlobOutcome::Uploaded)
            }
        }
    }

    /// Fetch a blob into `file` and re-verify the bytes against the digest.
    pub fn download_blob(
        &self,
        cancel: &CancelToken,
        node: &NodeIdentity,
        restore: &ForRestore,
        file: &mut File,
    ) -> Result<()> {
        self.download_blob_no_verify(cancel, node, restore, file)?;
        file.seek(SeekFrom::Start(0))?;
        restore.verify(file)
    }

    /// Variant for callers that verify separately through the digest
    /// pipeline (the restore worker's staging check).
    pub fn download_blob_no_verify(
        &self,
        cancel: &CancelToken,
        node: &NodeIdentity,
        restore: &ForRestore,
        file: &mut File,
    ) -> Result<()> {
        let key = self.layout().absolute_key_for_blob(node, restore);
        self.store().get_file(cancel, &key, file)
    }

    fn update_exists_cache(&self, node: &NodeIdentity, restore: &ForRestore, attrs: ObjectAttrs) {
        let mut locked_until = attrs.locked_until;
        if attrs.event_hold {
            locked_until = Seconds::now().add(self.store().lock_duration());
        }
        if locked_until > Seconds(0) {
            self.exists_cache().put(node, restore, locked_until);
        }
    }

    fn blob_exists(&self, node: &NodeIdentity, restore: &ForRestore) -> Result<bool> {
        if self.exists_cache().get(node, restore) {
            return Ok(true);
        }

        let key = self.layout().absolute_key_for_blob(node, restore);
        match self.store().head_object(&key) {
            Ok(attrs) => {
                self.update_exists_cache(node, restore, attrs);
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}
