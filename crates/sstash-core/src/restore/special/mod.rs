mod inventory;
mod name;
mod plan;

pub use inventory::{find_live_files, ToUpload};
pub use name::{parse_name, SstableName};
pub use plan::{
    build_location_plans, collate_existing_files, collate_node_plan, describe_to,
    to_restore_files, ComponentsByGeneration, ComponentsByLocation, ComponentsPlan, Location,
    LocationPlan, LocationPlans, TableComponents, VersionComponent,
};

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{info, warn};

use sstash_types::cancel::CancelToken;
use sstash_types::digest::ForRestore;
use sstash_types::error::{Result, SstashError};
use sstash_types::node::NodeIdentity;

use crate::bucket::Client;
use crate::digestcache::DigestCache;

use super::plan::PlanFilter;
use super::worker::{self, DownloadableFile, WorkerOptions, WorkerPlan};
use super::{identities_for_cluster, resolve_identity, plan as node_plan};

#[derive(Clone, Debug)]
pub struct SpecialRestoreOptions {
    pub plan: node_plan::PlanOptions,
    pub cluster: String,
    pub hostname: Option<String>,
    pub hostname_pattern: Option<String>,
    /// Pull SSTables from every matching node instead of just this one.
    pub cluster_mode: bool,
    pub keyspaces: Vec<String>,
    pub allow_changed: bool,
    /// Live data directory, inventoried in single-host mode so on-disk
    /// generations suppress matching downloads.
    pub data_dir: PathBuf,
    pub download_to_staging: bool,
    pub link_to_target: bool,
    pub worker: WorkerOptions,
}

/// The multi-source restore: collate generations per location across the
/// local disk and one or many node plans, renumber colliding generations,
/// and stage/link through the worker with every node that can serve a
/// digest as a source.
pub fn restore_special(
    cancel: &CancelToken,
    client: &Client,
    digest_cache: &DigestCache,
    options: &SpecialRestoreOptions,
) -> Result<()> {
    let mut plan_options = options.plan;
    let filter = PlanFilter::build(&options.keyspaces, &[], !options.cluster_mode)?;

    let mut local_collated: Option<ComponentsByLocation> = None;
    let mut node_collated: Vec<ComponentsByLocation> = Vec::new();
    let mut sources = SourcesByDigest::default();

    if options.cluster_mode {
        plan_options.maximize = true;
        let identities = identities_for_cluster(
            cancel,
            client,
            &options.cluster,
            options.hostname_pattern.as_deref(),
        )?;
        info!(?identities, "selected hosts");

        for identity in identities {
            let mut plan = node_plan::create(cancel, client, &identity, &plan_options)?;
            plan.filter(&filter);
            if plan.selected_manifests.is_empty() {
                warn!(identity = %identity, "no backups found");
                continue;
            }

            let (collated, unrecognized) = collate_node_plan(&plan);
            for name in unrecognized {
                warn!(identity = %identity, name = %name, "unrecognized file from host");
            }
            sources.add(&identity, &collated);
            node_collated.push(collated);
        }
    } else {
        let identity = resolve_identity(
            cancel,
            client,
            &options.cluster,
            options.hostname.as_deref(),
            options.hostname_pattern.as_deref(),
        )?;

        let mut plan = node_plan::create(cancel, client, &identity, &plan_options)?;
        plan.filter(&filter);
        if plan.selected_manifests.is_empty() {
            return Err(SstashError::NoBackupsFound);
        }
        info!(
            identity = %identity,
            base = %plan.selected_manifests[0],
            additional = plan.selected_manifests.len() - 1,
            "selected manifests"
        );

        if !plan.changed_files.is_empty() {
            for (name, history) in &plan.changed_files {
                for entry in history {
                    info!(name = %name, digest = %entry.digest, manifest = %entry.manifest, "file changed");
                }
            }
            if !options.allow_changed {
                return Err(SstashError::ChangesDetected);
            }
        }

        let live = find_live_files(cancel, digest_cache, &options.data_dir)?;
        let (local, unrecognized_local) = collate_existing_files(&live);
        let (collated, unrecognized_plan) = collate_node_plan(&plan);

        sources.add(&identity, &collated);
        sources.add(&identity, &local);

        for name in unrecognized_plan {
            warn!(name = %name, "unrecognized file from plan");
        }
        for name in unrecognized_local {
            warn!(name = %name, "unrecognized file from disk");
        }

        local_collated = Some(local);
        node_collated.push(collated);
    }

    let empty = ComponentsByLocation::new();
    let node_refs: Vec<&ComponentsByLocation> = node_collated.iter().collect();
    let combined = build_location_plans(local_collated.as_ref().unwrap_or(&empty), &node_refs);

    describe_to(&combined, &mut std::io::stdout(), true, true, true)?;

    let worker_plan = sources.make_worker_plan(&to_restore_files(&combined, true));
    let mut worker_options = options.worker.clone();
    worker_options.no_download_to_staging = !options.download_to_staging;
    worker_options.no_link_to_target = !options.link_to_target;
    if !worker_options.no_link_to_target {
        // Linking implies the blobs must be staged first.
        worker_options.no_download_to_staging = false;
    }

    worker::restore(cancel, client, digest_cache, worker_plan, &worker_options)
}

/// Which nodes' namespaces can serve each digest. Node lists are kept
/// sorted and deduplicated as they accumulate.
#[derive(Debug, Default)]
pub struct SourcesByDigest {
    by_digest: BTreeMap<ForRestore, Vec<NodeIdentity>>,
}

impl SourcesByDigest {
    pub fn add(&mut self, node: &NodeIdentity, collated: &ComponentsByLocation) {
        for by_generation in collated.values() {
            for components in by_generation.values() {
                for digest in components.values() {
                    let nodes = self.by_digest.entry(*digest).or_default();
                    nodes.push(node.clone());
                    nodes.sort();
                    nodes.dedup();
                }
            }
        }
    }

    pub fn make_worker_plan(&self, files: &BTreeMap<String, ForRestore>) -> WorkerPlan {
        files
            .iter()
            .map(|(name, digest)| {
                (
                    name.clone(),
                    DownloadableFile {
                        digest: *digest,
                        nodes: self.by_digest.get(digest).cloned().unwrap_or_default(),
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sstash_types::digest::ForUpload;
    use std::io::Cursor;

    fn digest(data: &[u8]) -> ForRestore {
        ForUpload::compute(&mut Cursor::new(data))
            .unwrap()
            .for_restore()
    }

    fn collated_with(digests: &[&[u8]]) -> ComponentsByLocation {
        let mut components = TableComponents::new();
        for (i, data) in digests.iter().enumerate() {
            components.insert(
                VersionComponent {
                    version: "md".into(),
                    component: format!("c{i}.db"),
                },
                digest(data),
            );
        }
        let mut by_generation = ComponentsByGeneration::new();
        by_generation.insert(1, components);
        let mut result = ComponentsByLocation::new();
        result.insert(
            Location {
                keyspace: "ks".into(),
                table: "t1-ab".into(),
                index: String::new(),
            },
            by_generation,
        );
        result
    }

    #[test]
    fn sources_are_sorted_and_deduplicated() {
        let mut sources = SourcesByDigest::default();
        let collated = collated_with(&[b"x"]);
        let node_b = NodeIdentity::new("c", "b");
        let node_a = NodeIdentity::new("c", "a");

        sources.add(&node_b, &collated);
        sources.add(&node_a, &collated);
        sources.add(&node_b, &collated);

        let nodes = sources.by_digest.get(&digest(b"x")).unwrap();
        assert_eq!(nodes, &vec![node_a, node_b]);
    }

    #[test]
    fn worker_plan_carries_sources_per_digest() {
        let mut sources = SourcesByDigest::default();
        let node = NodeIdentity::new("c", "h");
        sources.add(&node, &collated_with(&[b"x"]));

        let mut files = BTreeMap::new();
        files.insert("ks/t1-ab/md-1-big-c0.db".to_string(), digest(b"x"));
        files.insert("ks/t1-ab/md-1-big-Other.db".to_string(), digest(b"unsourced"));

        let plan = sources.make_worker_plan(&files);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan["ks/t1-ab/md-1-big-c0.db"].nodes, vec![node]);
        assert!(plan["ks/t1-ab/md-1-big-Other.db"].nodes.is_empty());
    }
}
