use tracing::warn;

use sstash_storage::ObjectStore;
use sstash_types::cancel::CancelToken;
use sstash_types::error::Result;
use sstash_types::node::NodeIdentity;

use super::documents::LIST_MANIFESTS_RETRIES_LIMIT;
use super::Client;

impl Client {
    /// Enumerate the hosts that have written manifests under a cluster.
    pub fn list_host_names(
        &self,
        cancel: &CancelToken,
        cluster: &str,
    ) -> Result<Vec<NodeIdentity>> {
        let list_prefix = self.layout().key_prefix_for_cluster_hosts(cluster);
        let prefixes = self.with_retries(cancel, LIST_MANIFESTS_RETRIES_LIMIT, "list_hosts", || {
            self.store().list_prefixes(&list_prefix)
        })?;
        let (nodes, bonus) = self.layout().decode_cluster_hosts(&prefixes);
        if !bonus.is_empty() {
            warn!(cluster, ?bonus, "unexpected prefixes in bucket while listing hosts");
        }
        Ok(nodes)
    }

    /// Enumerate every cluster with manifests in the bucket.
    pub fn list_clusters(&self, cancel: &CancelToken) -> Result<Vec<String>> {
        let list_prefix = self.layout().key_prefix_for_clusters();
        let prefixes =
            self.with_retries(cancel, LIST_MANIFESTS_RETRIES_LIMIT, "list_clusters", || {
                self.store().list_prefixes(&list_prefix)
            })?;
        let (clusters, bonus) = self.layout().decode_clusters(&prefixes);
        if !bonus.is_empty() {
            warn!(?bonus, "unexpected prefixes in bucket while listing clusters");
        }
        Ok(clusters)
    }
}
