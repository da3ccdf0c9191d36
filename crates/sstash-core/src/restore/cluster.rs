use std::path::PathBuf;

use tracing::{info, warn};

use sstash_types::cancel::CancelToken;
use sstash_types::error::{Result, SstashError};

use crate::bucket::Client;
use crate::digestcache::DigestCache;

use super::identities_for_cluster;
use super::plan::{self, PlanFilter, PlanOptions};
use super::worker::{self, DownloadableFile, WorkerOptions, WorkerPlan};

#[derive(Clone, Debug)]
pub struct ClusterRestoreOptions {
    pub plan: PlanOptions,
    pub cluster: String,
    pub hostname_pattern: String,
    /// `keyspace.table` specs to download.
    pub tables: Vec<String>,
    pub skip_indexes: bool,
    pub dry_run: bool,
    /// A subdirectory is created under this per host.
    pub target_directory: PathBuf,
    pub concurrent_download: usize,
    pub concurrent_verify: usize,
}

/// Download selected tables from every matching host's backups into
/// per-host subtrees of the target. Nothing is linked into a live data
/// directory and no ownership is enforced; this is an operator export.
pub fn restore_cluster(
    cancel: &CancelToken,
    client: &Client,
    digest_cache: &DigestCache,
    options: &ClusterRestoreOptions,
) -> Result<()> {
    let filter = PlanFilter::build(&[], &options.tables, !options.skip_indexes)?;
    let identities = identities_for_cluster(
        cancel,
        client,
        &options.cluster,
        Some(&options.hostname_pattern),
    )?;
    if identities.is_empty() {
        return Err(SstashError::NoBackupsFound);
    }

    for identity in identities {
        let mut node_plan = plan::create(cancel, client, &identity, &options.plan)?;
        node_plan.filter(&filter);
        if node_plan.selected_manifests.is_empty() {
            warn!(identity = %identity, "no backups found");
            continue;
        }

        if options.dry_run {
            for (name, digest) in &node_plan.files {
                info!(identity = %identity, name = %name, digest = %digest, "would download");
            }
            continue;
        }

        let host_dir = options.target_directory.join(&identity.hostname);
        let mut worker_options = WorkerOptions::new(
            &host_dir,
            options.target_directory.join(".staging").join(&identity.hostname),
            options.target_directory.join(".graveyard").join(&identity.hostname),
        );
        worker_options.concurrent_download = options.concurrent_download;
        worker_options.concurrent_verify = options.concurrent_verify;

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

        worker::restore(cancel, client, digest_cache, worker_plan, &worker_options)?;
        info!(identity = %identity, target = %host_dir.display(), "host download complete");
    }

    Ok(())
}
