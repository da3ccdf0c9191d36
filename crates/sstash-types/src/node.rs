use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a database node: cluster name plus hostname.
///
/// Used as a namespace in the bucket layout and in the local caches. Both
/// fields must be non-empty wherever a key is derived from them; the layout
/// functions enforce that.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeIdentity {
    pub cluster: String,
    pub hostname: String,
}

impl NodeIdentity {
    pub fn new(cluster: impl Into<String>, hostname: impl Into<String>) -> Self {
        NodeIdentity {
            cluster: cluster.into(),
            hostname: hostname.into(),
        }
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cluster, self.hostname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_cluster_then_hostname() {
        let a = NodeIdentity::new("alpha", "zed");
        let b = NodeIdentity::new("beta", "apple");
        let c = NodeIdentity::new("beta", "banana");
        let mut v = vec![c.clone(), a.clone(), b.clone()];
        v.sort();
        assert_eq!(v, vec![a, b, c]);
    }

    #[test]
    fn display() {
        let n = NodeIdentity::new("prod", "db-1");
        assert_eq!(n.to_string(), "prod/db-1");
    }
}
