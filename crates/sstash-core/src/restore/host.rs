use tracing::info;

use sstash_types::cancel::CancelToken;
use sstash_types::error::{Result, SstashError};

use crate::bucket::Client;
use crate::digestcache::DigestCache;
use crate::manifest::ManifestType;

use super::plan::{self, PlanOptions};
use super::worker::{self, DownloadableFile, WorkerOptions, WorkerPlan};
use super::resolve_identity;

#[derive(Clone, Debug)]
pub struct HostRestoreOptions {
    pub plan: PlanOptions,
    pub cluster: String,
    pub hostname: Option<String>,
    pub hostname_pattern: Option<String>,
    pub allow_changed: bool,
    pub dry_run: bool,
    pub worker: WorkerOptions,
}

/// Restore one node's full view in place. The base manifest must be a
/// snapshot, and file churn across the selection is refused unless allowed.
pub fn restore_host(
    cancel: &CancelToken,
    client: &Client,
    digest_cache: &DigestCache,
    options: &HostRestoreOptions,
) -> Result<()> {
    let identity = resolve_identity(
        cancel,
        client,
        &options.cluster,
        options.hostname.as_deref(),
        options.hostname_pattern.as_deref(),
    )?;

    let node_plan = plan::create(cancel, client, &identity, &options.plan)?;
    if node_plan.selected_manifests.is_empty() {
        return Err(SstashError::NoBackupsFound);
    }
    if node_plan.selected_manifests[0].manifest_type != ManifestType::Snapshot {
        return Err(SstashError::NoSnapshotsFound);
    }
    info!(
        identity = %identity,
        base = %node_plan.selected_manifests[0],
        additional = node_plan.selected_manifests.len() - 1,
        "selected manifests"
    );

    if !node_plan.changed_files.is_empty() {
        for (name, history) in &node_plan.changed_files {
            for entry in history {
                info!(name = %name, digest = %entry.digest, manifest = %entry.manifest, "file changed");
            }
        }
        if !options.allow_changed {
            return Err(SstashError::ChangesDetected);
        }
    }

    if options.dry_run {
        for (name, digest) in &node_plan.files {
            info!(name = %name, digest = %digest, "would download");
        }
        return Ok(());
    }

    let worker_plan: WorkerPlan = node_plan
        .files
        .into_iter()
        .map(|(name, digest)| {
            (
                name,
                DownloadableFile {
                    digest,
                    nodes: vec![identity.clone()],
                },
            )
        })
        .collect();

    worker::restore(cancel, client, digest_cache, worker_plan, &options.worker)
}
