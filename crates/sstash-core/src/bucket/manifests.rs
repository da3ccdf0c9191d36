use tracing::{error, warn};

use sstash_storage::ObjectStore;
use sstash_types::cancel::CancelToken;
use sstash_types::error::Result;
use sstash_types::node::NodeIdentity;
use sstash_types::unixtime::Seconds;

use crate::manifest::{Manifest, ManifestKey, ManifestType};

use super::documents::LIST_MANIFESTS_RETRIES_LIMIT;
use super::Client;

impl Client {
    /// List manifest keys for a node with `time` in
    /// `[start_after, not_after]` (both inclusive; zero bounds are open).
    /// The upper offset is the boundary key for `not_after + 1`, making the
    /// half-open listing inclusive on whole seconds.
    pub fn list_manifests(
        &self,
        cancel: &CancelToken,
        identity: &NodeIdentity,
        start_after: Seconds,
        not_after: Seconds,
    ) -> Result<Vec<ManifestKey>> {
        let prefix = self.layout().key_prefix_for_manifests(identity);
        let start_offset = self
            .layout()
            .key_for_manifest_time_range(identity, start_after);
        let end_offset = if not_after > Seconds(0) {
            self.layout()
                .key_for_manifest_time_range(identity, Seconds(not_after.0 + 1))
        } else {
            String::new()
        };

        let keys = self.with_retries(cancel, LIST_MANIFESTS_RETRIES_LIMIT, "list_manifests", || {
            self.store().list_objects(&prefix, &start_offset, &end_offset)
        })?;

        let mut result = Vec::with_capacity(keys.len());
        for key in keys {
            let name = key.rsplit('/').next().unwrap_or(&key);
            match ManifestKey::from_file_name(name) {
                Ok(manifest_key) => result.push(manifest_key),
                Err(e) => {
                    warn!(name, error = %e, "ignoring manifest with unparseable file name");
                }
            }
        }
        result.sort();
        Ok(result)
    }

    pub fn put_manifest(
        &self,
        cancel: &CancelToken,
        identity: &NodeIdentity,
        manifest: &Manifest,
    ) -> Result<()> {
        if manifest.manifest_type == ManifestType::Invalid {
            panic!("invalid manifest type");
        }
        let absolute_key = self.layout().key_for_manifest(identity, &manifest.key());
        self.put_document(cancel, &absolute_key, manifest)
    }

    pub fn get_manifests(
        &self,
        cancel: &CancelToken,
        identity: &NodeIdentity,
        keys: &[ManifestKey],
    ) -> Result<Vec<Manifest>> {
        let mut results = Vec::with_capacity(keys.len());
        for manifest_key in keys {
            let absolute_key = self.layout().key_for_manifest(identity, manifest_key);
            match self.get_document(cancel, &absolute_key) {
                Ok(manifest) => results.push(manifest),
                Err(e) => {
                    error!(key = %absolute_key, error = %e, "get manifest failed");
                    return Err(e);
                }
            }
        }
        Ok(results)
    }
}
