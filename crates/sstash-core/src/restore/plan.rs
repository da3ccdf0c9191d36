use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use sstash_types::cancel::CancelToken;
use sstash_types::digest::ForRestore;
use sstash_types::error::{Result, SstashError};
use sstash_types::node::NodeIdentity;
use sstash_types::unixtime::Seconds;

use crate::bucket::Client;
use crate::manifest::{Manifest, ManifestKey, ManifestType};

#[derive(Clone, Copy, Debug, Default)]
pub struct PlanOptions {
    pub start_after: Seconds,
    pub not_after: Seconds,
    /// Pick the newest possible view even when the base snapshot predates
    /// other candidates' windows (cluster-wide restores).
    pub maximize: bool,
    pub ignore_incomplete: bool,
    pub ignore_incremental: bool,
    pub ignore_snapshots: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestDigest {
    pub manifest: ManifestKey,
    pub digest: ForRestore,
}

/// The reconstruction recipe for one node: which manifests to apply in
/// order, the resulting path -> digest view, and every path whose digest
/// differed between selected manifests.
#[derive(Clone, Debug, Default)]
pub struct NodePlan {
    pub selected_manifests: Vec<ManifestKey>,
    pub files: BTreeMap<String, ForRestore>,
    pub changed_files: BTreeMap<String, Vec<ManifestDigest>>,
}

/// Select manifests and assemble the logical file view for `identity`.
///
/// Selection: latest qualifying snapshot is the base, followed by every
/// qualifying incremental strictly after it, in time order. Incomplete
/// manifests are never selected; unless `ignore_incomplete` is set, one
/// overlapping the selection aborts planning (a backup may still be
/// running).
pub fn create(
    cancel: &CancelToken,
    client: &Client,
    identity: &NodeIdentity,
    options: &PlanOptions,
) -> Result<NodePlan> {
    let keys = client.list_manifests(cancel, identity, options.start_after, options.not_after)?;

    let mut snapshots: Vec<ManifestKey> = Vec::new();
    let mut incrementals: Vec<ManifestKey> = Vec::new();
    let mut incompletes: Vec<ManifestKey> = Vec::new();
    for key in keys {
        match key.manifest_type {
            ManifestType::Snapshot if !options.ignore_snapshots => snapshots.push(key),
            ManifestType::Incremental if !options.ignore_incremental => incrementals.push(key),
            ManifestType::Incomplete => incompletes.push(key),
            _ => {}
        }
    }

    let base = snapshots.last().cloned();

    if !options.ignore_incomplete {
        let overlapping = incompletes
            .iter()
            .any(|k| base.as_ref().map_or(true, |b| k.time > b.time));
        if !incompletes.is_empty() && overlapping {
            return Err(SstashError::IncompleteBackup);
        }
    }

    let base_time = base.as_ref().map(|b| b.time);
    let mut selection: Vec<ManifestKey> = Vec::new();
    selection.extend(base.clone());
    selection.extend(
        incrementals
            .into_iter()
            .filter(|k| base_time.map_or(true, |t| k.time > t)),
    );

    if selection.is_empty() {
        return Ok(NodePlan::default());
    }

    let manifests = client.get_manifests(cancel, identity, &selection)?;
    let mut plan = assemble(&manifests);
    plan.selected_manifests = selection;
    Ok(plan)
}

/// Serial fold over the selected manifests: later digests win, and any path
/// observed with two different digests lands in `changed_files` with its
/// full history.
fn assemble(manifests: &[Manifest]) -> NodePlan {
    let mut files: BTreeMap<String, ManifestDigest> = BTreeMap::new();
    let mut changed_files: BTreeMap<String, Vec<ManifestDigest>> = BTreeMap::new();

    for manifest in manifests {
        let key = manifest.key();
        for (path, digests) in &manifest.files {
            let observed = ManifestDigest {
                manifest: key.clone(),
                digest: digests.for_restore(),
            };
            match files.get(path) {
                Some(previous) if previous.digest != observed.digest => {
                    let history = changed_files.entry(path.clone()).or_default();
                    if history.is_empty() {
                        history.push(previous.clone());
                    }
                    history.push(observed.clone());
                    files.insert(path.clone(), observed);
                }
                _ => {
                    files.insert(path.clone(), observed);
                }
            }
        }
    }

    NodePlan {
        selected_manifests: Vec::new(),
        files: files
            .into_iter()
            .map(|(path, md)| (path, md.digest))
            .collect(),
        changed_files,
    }
}

/// Post-filter restricting a plan to keyspaces / `ks.table` specs, with
/// optional index exclusion. An empty filter matches everything.
#[derive(Clone, Debug, Default)]
pub struct PlanFilter {
    pub keyspaces: BTreeSet<String>,
    pub tables: BTreeSet<String>,
    pub include_indexes: bool,
}

impl PlanFilter {
    pub fn build(keyspaces: &[String], tables: &[String], include_indexes: bool) -> Result<Self> {
        let mut filter = PlanFilter {
            include_indexes,
            ..PlanFilter::default()
        };
        for table_spec in tables {
            let parts: Vec<&str> = table_spec.split('.').collect();
            if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
                return Err(SstashError::Config(format!(
                    "invalid table spec '{table_spec}' (expected keyspace.table)"
                )));
            }
            filter.tables.insert(table_spec.clone());
        }
        for keyspace in keyspaces {
            filter.keyspaces.insert(keyspace.clone());
        }
        Ok(filter)
    }

    fn is_empty(&self) -> bool {
        self.keyspaces.is_empty() && self.tables.is_empty()
    }

    pub fn matches(&self, name: &str) -> bool {
        let parts: Vec<&str> = name.split('/').collect();
        if parts.len() < 3 {
            warn!(name, "unexpected manifest path shape");
            return false;
        }
        if !self.include_indexes && parts[2].starts_with('.') {
            return false;
        }
        if self.is_empty() {
            return true;
        }
        let keyspace = parts[0];
        if self.keyspaces.contains(keyspace) {
            return true;
        }
        // The table directory carries a uuid suffix: `<table>-<uuid>`.
        let Some(suffix_index) = parts[1].rfind('-') else {
            warn!(name, "table directory without uuid suffix");
            return false;
        };
        let table = &parts[1][..suffix_index];
        self.tables.contains(&format!("{keyspace}.{table}"))
    }
}

impl NodePlan {
    pub fn filter(&mut self, filter: &PlanFilter) {
        self.files.retain(|name, _| filter.matches(name));
        self.changed_files.retain(|name, _| filter.matches(name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sstash_types::digest::ForUpload;
    use std::io::Cursor;

    fn upload_digest(data: &[u8]) -> ForUpload {
        ForUpload::compute(&mut Cursor::new(data)).unwrap()
    }

    fn manifest(time: i64, manifest_type: ManifestType, files: &[(&str, &[u8])]) -> Manifest {
        let mut m = Manifest::skeleton(manifest_type, Seconds(time));
        for (path, data) in files {
            m.files.insert((*path).to_string(), upload_digest(data));
        }
        m
    }

    #[test]
    fn assemble_no_changes() {
        // S3: snapshot {a: d1, b: d2} then incremental {a: d1, c: d3}.
        let manifests = vec![
            manifest(
                100,
                ManifestType::Snapshot,
                &[("a", b"d1" as &[u8]), ("b", b"d2")],
            ),
            manifest(
                200,
                ManifestType::Incremental,
                &[("a", b"d1" as &[u8]), ("c", b"d3")],
            ),
        ];
        let plan = assemble(&manifests);
        assert_eq!(plan.files.len(), 3);
        assert_eq!(
            plan.files.get("a"),
            Some(&upload_digest(b"d1").for_restore())
        );
        assert_eq!(
            plan.files.get("c"),
            Some(&upload_digest(b"d3").for_restore())
        );
        assert!(plan.changed_files.is_empty());
    }

    #[test]
    fn assemble_records_change_history() {
        // S4: digest of `a` differs between the two manifests.
        let m1 = manifest(100, ManifestType::Snapshot, &[("a", b"d1" as &[u8])]);
        let m2 = manifest(200, ManifestType::Incremental, &[("a", b"d2" as &[u8])]);
        let (k1, k2) = (m1.key(), m2.key());
        let plan = assemble(&[m1, m2]);

        // Latest digest wins in files.
        assert_eq!(
            plan.files.get("a"),
            Some(&upload_digest(b"d2").for_restore())
        );
        let history = plan.changed_files.get("a").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].manifest, k1);
        assert_eq!(history[0].digest, upload_digest(b"d1").for_restore());
        assert_eq!(history[1].manifest, k2);
        assert_eq!(history[1].digest, upload_digest(b"d2").for_restore());
    }

    #[test]
    fn assemble_matches_serial_fold_reference() {
        let manifests = vec![
            manifest(
                100,
                ManifestType::Snapshot,
                &[("a", b"1" as &[u8]), ("b", b"2")],
            ),
            manifest(
                200,
                ManifestType::Incremental,
                &[("b", b"2b" as &[u8]), ("c", b"3")],
            ),
            manifest(
                300,
                ManifestType::Incremental,
                &[("b", b"2c" as &[u8]), ("d", b"4")],
            ),
        ];
        let plan = assemble(&manifests);

        // Reference serial fold.
        let mut reference = BTreeMap::new();
        for m in &manifests {
            for (path, d) in &m.files {
                reference.insert(path.clone(), d.for_restore());
            }
        }
        assert_eq!(plan.files, reference);
        // Exactly the paths whose digest differed.
        assert_eq!(
            plan.changed_files.keys().collect::<Vec<_>>(),
            vec!["b"]
        );
        assert_eq!(plan.changed_files["b"].len(), 3);
    }

    #[test]
    fn reappearing_same_digest_is_not_a_change() {
        let manifests = vec![
            manifest(100, ManifestType::Snapshot, &[("a", b"same" as &[u8])]),
            manifest(200, ManifestType::Incremental, &[("a", b"same" as &[u8])]),
        ];
        let plan = assemble(&manifests);
        assert!(plan.changed_files.is_empty());
    }

    #[test]
    fn filter_by_keyspace_and_table() {
        let filter = PlanFilter::build(
            &["luneta".to_string()],
            &["system_distributed.repair_history".to_string()],
            false,
        )
        .unwrap();

        assert!(filter.matches("luneta/ap-a485d1f5/md-53-big-Data.db"));
        assert!(filter.matches(
            "system_distributed/repair_history-759fffad/md-1864-big-Data.db"
        ));
        assert!(!filter.matches("other/t1-abcd/md-1-big-Data.db"));
        // Indexes excluded unless asked for.
        assert!(!filter.matches("luneta/ap-a485d1f5/.ap_id_index/md-53-big-Data.db"));

        let with_indexes = PlanFilter::build(&["luneta".to_string()], &[], true).unwrap();
        assert!(with_indexes.matches("luneta/ap-a485d1f5/.ap_id_index/md-53-big-Data.db"));
    }

    #[test]
    fn empty_filter_matches_all_but_still_excludes_indexes() {
        let filter = PlanFilter::build(&[], &[], false).unwrap();
        assert!(filter.matches("anyks/t1-abcd/md-1-big-Data.db"));
        assert!(!filter.matches("anyks/t1-abcd/.idx/md-1-big-Data.db"));
    }

    #[test]
    fn filter_rejects_bad_table_spec() {
        assert!(PlanFilter::build(&[], &["no_dot".to_string()], false).is_err());
        assert!(PlanFilter::build(&[], &["a.b.c".to_string()], false).is_err());
    }

    #[test]
    fn node_plan_filter_prunes_both_maps() {
        let m1 = manifest(100, ManifestType::Snapshot, &[
            ("keep/t1-ab/md-1-big-Data.db", b"1" as &[u8]),
            ("drop/t2-cd/md-1-big-Data.db", b"2"),
        ]);
        let m2 = manifest(200, ManifestType::Incremental, &[
            ("drop/t2-cd/md-1-big-Data.db", b"2x" as &[u8]),
        ]);
        let mut plan = assemble(&[m1, m2]);
        assert_eq!(plan.changed_files.len(), 1);

        let filter = PlanFilter::build(&["keep".to_string()], &[], false).unwrap();
        plan.filter(&filter);
        assert_eq!(plan.files.len(), 1);
        assert!(plan.changed_files.is_empty());
    }
}
