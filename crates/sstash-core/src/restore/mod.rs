pub mod cluster;
pub mod host;
pub mod plan;
pub mod special;
pub mod worker;

use sstash_types::cancel::CancelToken;
use sstash_types::error::{Result, SstashError};
use sstash_types::node::NodeIdentity;

use crate::bucket::Client;

/// Resolve the node to restore from: an explicit hostname wins; otherwise a
/// hostname prefix pattern must match exactly one host with backups in the
/// bucket.
pub fn resolve_identity(
    cancel: &CancelToken,
    client: &Client,
    cluster: &str,
    hostname: Option<&str>,
    hostname_pattern: Option<&str>,
) -> Result<NodeIdentity> {
    if cluster.is_empty() {
        return Err(SstashError::Config("cluster is required".into()));
    }
    if let Some(hostname) = hostname.filter(|h| !h.is_empty()) {
        return Ok(NodeIdentity::new(cluster, hostname));
    }
    let Some(pattern) = hostname_pattern.filter(|p| !p.is_empty()) else {
        return Err(SstashError::Config(
            "either a hostname or a hostname pattern is required".into(),
        ));
    };

    let mut matches: Vec<NodeIdentity> = client
        .list_host_names(cancel, cluster)?
        .into_iter()
        .filter(|node| node.hostname.starts_with(pattern))
        .collect();
    matches.sort();
    match matches.len() {
        1 => Ok(matches.remove(0)),
        0 => Err(SstashError::Config(format!(
            "no host in cluster '{cluster}' matches pattern '{pattern}'"
        ))),
        n => Err(SstashError::Config(format!(
            "pattern '{pattern}' matches {n} hosts in cluster '{cluster}'"
        ))),
    }
}

/// All hosts in the cluster with backups, optionally narrowed by a hostname
/// prefix pattern.
pub fn identities_for_cluster(
    cancel: &CancelToken,
    client: &Client,
    cluster: &str,
    hostname_pattern: Option<&str>,
) -> Result<Vec<NodeIdentity>> {
    if cluster.is_empty() {
        return Err(SstashError::Config("cluster is required".into()));
    }
    let mut nodes = client.list_host_names(cancel, cluster)?;
    if let Some(pattern) = hostname_pattern.filter(|p| !p.is_empty()) {
        nodes.retain(|node| node.hostname.starts_with(pattern));
    }
    nodes.sort();
    Ok(nodes)
}
