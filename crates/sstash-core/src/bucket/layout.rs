use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;

use sstash_types::digest::ForRestore;
use sstash_types::node::NodeIdentity;
use sstash_types::unixtime::Seconds;

use crate::manifest::ManifestKey;

/// Deterministic mapping from (node, digest) and (node, manifest key) to
/// bucket keys.
///
/// Blobs: `files/<b64url(cluster)>/<b64url(host)>/blake2b/<d0>/<d1>/<d2..>`
/// where d0/d1 are the first two characters of the lowercase hex digest.
/// The deprecated common-files layout drops the node segments; writes must
/// not use it, reads may for backwards compatibility.
///
/// Manifests: `manifests/<b64url(cluster)>/<b64url(host)>/<filename>`.
#[derive(Clone, Debug, Default)]
pub struct Layout {
    pub prefix: String,
    pub use_deprecated_common_files: bool,
}

impl Layout {
    fn key_with_prefix(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{key}", self.prefix)
        }
    }

    pub fn absolute_key_for_blob(&self, node: &NodeIdentity, digest: &ForRestore) -> String {
        let encoded = digest.to_hex();
        if self.use_deprecated_common_files {
            return self.key_with_prefix(&format!(
                "files/blake2b/{}/{}/{}",
                &encoded[0..1],
                &encoded[1..2],
                &encoded[2..]
            ));
        }
        let (url_cluster, url_hostname) = encode_node_identity(node);
        self.key_with_prefix(&format!(
            "files/{url_cluster}/{url_hostname}/blake2b/{}/{}/{}",
            &encoded[0..1],
            &encoded[1..2],
            &encoded[2..]
        ))
    }

    pub(crate) fn key_prefix_for_clusters(&self) -> String {
        self.key_with_prefix("manifests/")
    }

    pub(crate) fn key_prefix_for_cluster_hosts(&self, cluster: &str) -> String {
        if cluster.is_empty() {
            panic!("empty cluster");
        }
        format!(
            "{}{}/",
            self.key_prefix_for_clusters(),
            URL_SAFE.encode(cluster.as_bytes())
        )
    }

    pub(crate) fn key_prefix_for_manifests(&self, identity: &NodeIdentity) -> String {
        if identity.hostname.is_empty() {
            panic!("empty hostname");
        }
        format!(
            "{}{}/",
            self.key_prefix_for_cluster_hosts(&identity.cluster),
            URL_SAFE.encode(identity.hostname.as_bytes())
        )
    }

    pub(crate) fn key_for_manifest_time_range(
        &self,
        identity: &NodeIdentity,
        boundary: Seconds,
    ) -> String {
        format!("{}{}", self.key_prefix_for_manifests(identity), boundary.decimal())
    }

    pub(crate) fn key_for_manifest(&self, identity: &NodeIdentity, key: &ManifestKey) -> String {
        format!("{}{}", self.key_prefix_for_manifests(identity), key.file_name())
    }

    /// Decode `manifests/<cluster>/<host>/` prefixes into identities.
    /// Undecodable prefixes come back separately for the caller to log.
    pub(crate) fn decode_cluster_hosts(
        &self,
        prefixes: &[String],
    ) -> (Vec<NodeIdentity>, Vec<String>) {
        let skip = self.key_prefix_for_clusters().len();
        let mut result = Vec::with_capacity(prefixes.len());
        let mut bonus = Vec::new();
        for raw in prefixes {
            if raw.len() < skip {
                bonus.push(raw.clone());
                continue;
            }
            let parts: Vec<&str> = raw[skip..].split('/').collect();
            if parts.len() != 3 {
                bonus.push(raw.clone());
                continue;
            }
            let (Some(cluster), Some(hostname)) = (decode_segment(parts[0]), decode_segment(parts[1]))
            else {
                bonus.push(raw.clone());
                continue;
            };
            result.push(NodeIdentity { cluster, hostname });
        }
        (result, bonus)
    }

    /// Decode `manifests/<cluster>/` prefixes into cluster names.
    pub(crate) fn decode_clusters(&self, prefixes: &[String]) -> (Vec<String>, Vec<String>) {
        let skip = self.key_prefix_for_clusters().len();
        let mut result = Vec::with_capacity(prefixes.len());
        let mut bonus = Vec::new();
        for raw in prefixes {
            if raw.len() < skip {
                bonus.push(raw.clone());
                continue;
            }
            let trimmed = raw[skip..].trim_end_matches('/');
            match decode_segment(trimmed) {
                Some(cluster) if !trimmed.contains('/') => result.push(cluster),
                _ => bonus.push(raw.clone()),
            }
        }
        (result, bonus)
    }
}

fn encode_node_identity(node: &NodeIdentity) -> (String, String) {
    if node.cluster.is_empty() {
        panic!("empty cluster");
    }
    if node.hostname.is_empty() {
        panic!("empty hostname");
    }
    (
        URL_SAFE.encode(node.cluster.as_bytes()),
        URL_SAFE.encode(node.hostname.as_bytes()),
    )
}

fn decode_segment(segment: &str) -> Option<String> {
    let raw = URL_SAFE.decode(segment).ok()?;
    String::from_utf8(raw).ok()
}
