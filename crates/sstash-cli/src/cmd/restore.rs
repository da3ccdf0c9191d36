use std::path::PathBuf;

use sstash_core::bucket::Client;
use sstash_core::digestcache::DigestCache;
use sstash_core::restore::cluster::{restore_cluster, ClusterRestoreOptions};
use sstash_core::restore::host::{restore_host, HostRestoreOptions};
use sstash_core::restore::plan::PlanOptions;
use sstash_core::restore::special::{restore_special, SpecialRestoreOptions};
use sstash_core::restore::worker::WorkerOptions;
use sstash_types::cancel::CancelToken;
use sstash_types::error::Result;
use sstash_types::unixtime::Seconds;

use crate::cli::{RestoreCommand, SelectionArgs, WorkerArgs};

pub(crate) fn run(
    cancel: &CancelToken,
    client: &Client,
    digest_cache: &DigestCache,
    command: &RestoreCommand,
) -> Result<()> {
    match command {
        RestoreCommand::Host {
            selection,
            worker,
            target,
            allow_changed,
            dry_run,
            keep_invalid,
        } => {
            let mut worker_options = worker_options(worker, target);
            worker_options.remove_invalid_at_target = !keep_invalid;
            restore_host(
                cancel,
                client,
                digest_cache,
                &HostRestoreOptions {
                    plan: plan_options(selection),
                    cluster: selection.cluster.clone(),
                    hostname: selection.hostname.clone(),
                    hostname_pattern: selection.hostname_pattern.clone(),
                    allow_changed: *allow_changed,
                    dry_run: *dry_run,
                    worker: worker_options,
                },
            )
        }
        RestoreCommand::Cluster {
            cluster,
            hostname_pattern,
            target,
            tables,
            skip_indexes,
            not_before,
            not_after,
            dry_run,
            concurrent_download,
            concurrent_verify,
        } => restore_cluster(
            cancel,
            client,
            digest_cache,
            &ClusterRestoreOptions {
                plan: PlanOptions {
                    start_after: Seconds(*not_before),
                    not_after: Seconds(*not_after),
                    ..PlanOptions::default()
                },
                cluster: cluster.clone(),
                hostname_pattern: hostname_pattern.clone(),
                tables: tables.clone(),
                skip_indexes: *skip_indexes,
                dry_run: *dry_run,
                target_directory: target.clone(),
                concurrent_download: *concurrent_download,
                concurrent_verify: *concurrent_verify,
            },
        ),
        RestoreCommand::Special {
            selection,
            worker,
            target,
            data_dir,
            download_to_staging,
            link_to_target,
            all_nodes,
            keyspaces,
            ignore_incremental,
            ignore_snapshots,
            ignore_incomplete,
            allow_changed,
        } => restore_special(
            cancel,
            client,
            digest_cache,
            &SpecialRestoreOptions {
                plan: PlanOptions {
                    start_after: Seconds(selection.not_before),
                    not_after: Seconds(selection.not_after),
                    maximize: false,
                    ignore_incomplete: *ignore_incomplete,
                    ignore_incremental: *ignore_incremental,
                    ignore_snapshots: *ignore_snapshots,
                },
                cluster: selection.cluster.clone(),
                hostname: selection.hostname.clone(),
                hostname_pattern: selection.hostname_pattern.clone(),
                cluster_mode: *all_nodes,
                keyspaces: keyspaces.clone(),
                allow_changed: *allow_changed,
                data_dir: data_dir.clone(),
                download_to_staging: *download_to_staging,
                link_to_target: *link_to_target,
                worker: worker_options(worker, target),
            },
        ),
    }
}

fn plan_options(selection: &SelectionArgs) -> PlanOptions {
    PlanOptions {
        start_after: Seconds(selection.not_before),
        not_after: Seconds(selection.not_after),
        ..PlanOptions::default()
    }
}

fn worker_options(worker: &WorkerArgs, target: &PathBuf) -> WorkerOptions {
    let mut options = WorkerOptions::new(target, &worker.staging_dir, &worker.graveyard_dir);
    options.ensure_ownership = worker.ensure_ownership;
    options.owner_user = worker.owner_user.clone();
    options.concurrent_download = worker.concurrent_download;
    options.concurrent_verify = worker.concurrent_verify;
    options
}
