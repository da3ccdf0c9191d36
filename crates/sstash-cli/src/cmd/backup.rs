use sstash_core::backup::{run_backup, BackupOptions};
use sstash_core::bucket::Client;
use sstash_core::digestcache::DigestCache;
use sstash_core::manifest::{Manifest, ManifestType};
use sstash_types::cancel::CancelToken;
use sstash_types::error::{Result, SstashError};
use sstash_types::node::NodeIdentity;
use sstash_types::unixtime::Seconds;

use crate::cli::{BackupCommand, NodeArgs};

pub(crate) fn run(
    cancel: &CancelToken,
    client: &Client,
    digest_cache: &DigestCache,
    command: &BackupCommand,
) -> Result<()> {
    match command {
        BackupCommand::Incremental {
            node,
            data_dir,
            delete_backups,
        } => {
            let identity = identity_from(node)?;
            let manifest = Manifest::skeleton(ManifestType::Incremental, Seconds::now());
            run_backup(
                cancel,
                client,
                digest_cache,
                &identity,
                manifest,
                &BackupOptions {
                    data_dir: data_dir.clone(),
                    snapshot_name: None,
                    delete_backups: *delete_backups,
                },
            )?;
            Ok(())
        }
        BackupCommand::Snapshot {
            node,
            data_dir,
            name,
        } => {
            let identity = identity_from(node)?;
            let manifest = Manifest::skeleton(ManifestType::Snapshot, Seconds::now());
            run_backup(
                cancel,
                client,
                digest_cache,
                &identity,
                manifest,
                &BackupOptions {
                    data_dir: data_dir.clone(),
                    snapshot_name: Some(name.clone()),
                    delete_backups: false,
                },
            )?;
            Ok(())
        }
    }
}

fn identity_from(node: &NodeArgs) -> Result<NodeIdentity> {
    if node.cluster.is_empty() || node.hostname.is_empty() {
        return Err(SstashError::Config(
            "cluster and hostname must not be empty".into(),
        ));
    }
    Ok(NodeIdentity::new(&node.cluster, &node.hostname))
}
