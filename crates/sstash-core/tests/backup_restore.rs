use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use sstash_core::backup::{run_backup, BackupOptions};
use sstash_core::bucket::{Client, ExistsCache, Layout, PutBlobOutcome};
use sstash_core::cache::CacheStorage;
use sstash_core::digestcache::DigestCache;
use sstash_core::manifest::{Manifest, ManifestType};
use sstash_core::restore::host::{restore_host, HostRestoreOptions};
use sstash_core::restore::plan::{self, PlanOptions};
use sstash_core::restore::worker::WorkerOptions;
use sstash_storage::memory::MemoryStore;
use sstash_storage::ObjectStore;
use sstash_types::cancel::CancelToken;
use sstash_types::digest::ForUpload;
use sstash_types::error::SstashError;
use sstash_types::node::NodeIdentity;
use sstash_types::paranoid::ParanoidFile;
use sstash_types::unixtime::Seconds;

struct Harness {
    _tmp: tempfile::TempDir,
    store: Arc<MemoryStore>,
    client: Client,
    digest_cache: DigestCache,
    cancel: CancelToken,
}

fn harness_with_layout(layout: Layout) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new(Duration::from_secs(86400)));
    let cache_storage = Arc::new(CacheStorage::open(tmp.path().join("kv")).unwrap());
    let digest_cache = DigestCache::new(&cache_storage);
    let exists_cache = ExistsCache::new(cache_storage, layout.use_deprecated_common_files);
    let dyn_store: Arc<dyn ObjectStore> = store.clone();
    let client = Client::new(dyn_store, layout, exists_cache);
    Harness {
        _tmp: tmp,
        store,
        client,
        digest_cache,
        cancel: CancelToken::never(),
    }
}

fn harness() -> Harness {
    harness_with_layout(Layout::default())
}

fn node() -> NodeIdentity {
    NodeIdentity::new("prod", "db-1")
}

fn write_file(root: &Path, rel: &str, contents: &[u8]) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn upload_digests(data: &[u8]) -> ForUpload {
    ForUpload::compute(&mut Cursor::new(data)).unwrap()
}

// S1: an incremental run against an empty bucket uploads one blob under
// the computed key and writes one incremental manifest mapping the
// table-relative path to the content digests.
#[test]
fn incremental_backup_uploads_blob_and_manifest() {
    let h = harness();
    let data_dir = tempfile::tempdir().unwrap();
    write_file(data_dir.path(), "ks/t1-abcd/backups/md-1-big-Data.db", b"hello");

    let manifest = run_backup(
        &h.cancel,
        &h.client,
        &h.digest_cache,
        &node(),
        Manifest::skeleton(ManifestType::Incremental, Seconds(1_600_000_000)),
        &BackupOptions {
            data_dir: data_dir.path().to_path_buf(),
            snapshot_name: None,
            delete_backups: false,
        },
    )
    .unwrap();

    let expected = upload_digests(b"hello");
    assert_eq!(
        manifest.files.get("ks/t1-abcd/md-1-big-Data.db"),
        Some(&expected)
    );

    // Exactly one blob, at the canonical key, holding the right bytes.
    let blob_key = h
        .client
        .layout()
        .absolute_key_for_blob(&node(), &expected.for_restore());
    assert_eq!(h.store.object(&blob_key).unwrap(), b"hello");

    // Exactly one manifest in the node's stream, round-tripping intact.
    let keys = h
        .client
        .list_manifests(&h.cancel, &node(), Seconds(0), Seconds(0))
        .unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].manifest_type, ManifestType::Incremental);
    let fetched = h.client.get_manifests(&h.cancel, &node(), &keys).unwrap();
    assert_eq!(fetched[0].files, manifest.files);

    // One blob + one manifest total.
    assert_eq!(h.store.len(), 2);

    // Manifests are stored as gzip-compressed JSON documents.
    let manifest_obj_key = h
        .store
        .keys()
        .into_iter()
        .find(|k| k.starts_with("manifests/"))
        .unwrap();
    let (content_type, content_encoding) = h.store.content_metadata(&manifest_obj_key).unwrap();
    assert_eq!(content_type, "application/json");
    assert_eq!(content_encoding, "gzip");
}

// Property 4: a second put of the same (node, contents) is skipped without
// storing anything new.
#[test]
fn put_blob_is_idempotent() {
    let h = harness();
    let data_dir = tempfile::tempdir().unwrap();
    write_file(data_dir.path(), "blob", b"same bytes");
    let file = ParanoidFile::capture(data_dir.path().join("blob")).unwrap();
    let digests = upload_digests(b"same bytes");

    let first = h
        .client
        .put_blob(&h.cancel, &node(), &file, &digests)
        .unwrap();
    assert_eq!(first, PutBlobOutcome::Uploaded);
    let objects_after_first = h.store.len();

    let second = h
        .client
        .put_blob(&h.cancel, &node(), &file, &digests)
        .unwrap();
    assert_eq!(second, PutBlobOutcome::Skipped);
    assert_eq!(h.store.len(), objects_after_first);
}

// S2: identical bytes from two hosts occupy two keys under the canonical
// per-host layout, but only one under the legacy common layout.
#[test]
fn dedup_across_hosts_depends_on_layout() {
    let data_dir = tempfile::tempdir().unwrap();
    write_file(data_dir.path(), "blob", b"shared bytes");
    let file = ParanoidFile::capture(data_dir.path().join("blob")).unwrap();
    let digests = upload_digests(b"shared bytes");
    let node_a = NodeIdentity::new("prod", "db-1");
    let node_b = NodeIdentity::new("prod", "db-2");

    // Canonical layout: two keys.
    let h = harness();
    assert_eq!(
        h.client.put_blob(&h.cancel, &node_a, &file, &digests).unwrap(),
        PutBlobOutcome::Uploaded
    );
    assert_eq!(
        h.client.put_blob(&h.cancel, &node_b, &file, &digests).unwrap(),
        PutBlobOutcome::Uploaded
    );
    assert_eq!(h.store.len(), 2);

    // Legacy common layout: one key, second upload skipped.
    let legacy = harness_with_layout(Layout {
        prefix: String::new(),
        use_deprecated_common_files: true,
    });
    assert_eq!(
        legacy
            .client
            .put_blob(&legacy.cancel, &node_a, &file, &digests)
            .unwrap(),
        PutBlobOutcome::Uploaded
    );
    assert_eq!(
        legacy
            .client
            .put_blob(&legacy.cancel, &node_b, &file, &digests)
            .unwrap(),
        PutBlobOutcome::Skipped
    );
    assert_eq!(legacy.store.len(), 1);
}

fn put_manifest_with(h: &Harness, time: i64, manifest_type: ManifestType, files: &[(&str, &[u8])]) {
    let mut manifest = Manifest::skeleton(manifest_type, Seconds(time));
    for (path, data) in files {
        manifest
            .files
            .insert((*path).to_string(), upload_digests(data));
    }
    h.client.put_manifest(&h.cancel, &node(), &manifest).unwrap();
}

// S3: snapshot + later incremental with no churn.
#[test]
fn planner_selects_and_merges_without_changes() {
    let h = harness();
    put_manifest_with(
        &h,
        100,
        ManifestType::Snapshot,
        &[("a", b"d1" as &[u8]), ("b", b"d2")],
    );
    put_manifest_with(
        &h,
        200,
        ManifestType::Incremental,
        &[("a", b"d1" as &[u8]), ("c", b"d3")],
    );

    let node_plan = plan::create(&h.cancel, &h.client, &node(), &PlanOptions::default()).unwrap();

    assert_eq!(
        node_plan
            .selected_manifests
            .iter()
            .map(|k| k.time.0)
            .collect::<Vec<_>>(),
        vec![100, 200]
    );
    assert_eq!(node_plan.files.len(), 3);
    assert_eq!(
        node_plan.files.get("a"),
        Some(&upload_digests(b"d1").for_restore())
    );
    assert_eq!(
        node_plan.files.get("b"),
        Some(&upload_digests(b"d2").for_restore())
    );
    assert_eq!(
        node_plan.files.get("c"),
        Some(&upload_digests(b"d3").for_restore())
    );
    assert!(node_plan.changed_files.is_empty());
}

// S4: churn between manifests is recorded, and host restore refuses it
// unless allowed.
#[test]
fn planner_detects_changes_and_host_restore_enforces_policy() {
    let h = harness();
    put_manifest_with(&h, 100, ManifestType::Snapshot, &[("a", b"d1" as &[u8])]);
    put_manifest_with(&h, 200, ManifestType::Incremental, &[("a", b"d2" as &[u8])]);

    let node_plan = plan::create(&h.cancel, &h.client, &node(), &PlanOptions::default()).unwrap();
    let history = node_plan.changed_files.get("a").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].manifest.time, Seconds(100));
    assert_eq!(history[0].digest, upload_digests(b"d1").for_restore());
    assert_eq!(history[1].manifest.time, Seconds(200));
    assert_eq!(history[1].digest, upload_digests(b"d2").for_restore());
    assert_eq!(
        node_plan.files.get("a"),
        Some(&upload_digests(b"d2").for_restore())
    );

    let target = tempfile::tempdir().unwrap();
    let mut options = HostRestoreOptions {
        plan: PlanOptions::default(),
        cluster: "prod".into(),
        hostname: Some("db-1".into()),
        hostname_pattern: None,
        allow_changed: false,
        dry_run: true,
        worker: WorkerOptions::new(
            target.path().join("data"),
            target.path().join("staging"),
            target.path().join("graveyard"),
        ),
    };

    let err = restore_host(&h.cancel, &h.client, &h.digest_cache, &options).unwrap_err();
    assert!(matches!(err, SstashError::ChangesDetected));

    options.allow_changed = true;
    restore_host(&h.cancel, &h.client, &h.digest_cache, &options).unwrap();
}

// Open question (a): the listing upper bound is inclusive, the lower bound
// is inclusive too.
#[test]
fn manifest_listing_bounds_are_inclusive() {
    let h = harness();
    for time in [100, 200, 201] {
        put_manifest_with(&h, time, ManifestType::Incremental, &[]);
    }

    let keys = h
        .client
        .list_manifests(&h.cancel, &node(), Seconds(100), Seconds(200))
        .unwrap();
    assert_eq!(keys.iter().map(|k| k.time.0).collect::<Vec<_>>(), vec![100, 200]);
}

// Incomplete manifests block planning unless explicitly ignored.
#[test]
fn incomplete_manifest_blocks_planning() {
    let h = harness();
    put_manifest_with(&h, 100, ManifestType::Snapshot, &[("a", b"d1" as &[u8])]);
    put_manifest_with(&h, 150, ManifestType::Incomplete, &[]);

    let err = plan::create(&h.cancel, &h.client, &node(), &PlanOptions::default()).unwrap_err();
    assert!(matches!(err, SstashError::IncompleteBackup));

    let options = PlanOptions {
        ignore_incomplete: true,
        ..PlanOptions::default()
    };
    let node_plan = plan::create(&h.cancel, &h.client, &node(), &options).unwrap();
    assert_eq!(node_plan.selected_manifests.len(), 1);
}

// Full cycle: snapshot backup, an incremental on top, then restore the
// host view into a fresh target tree.
#[test]
fn backup_then_restore_round_trip() {
    let h = harness();
    let data_dir = tempfile::tempdir().unwrap();
    write_file(
        data_dir.path(),
        "ks/t1-abcd/snapshots/weekly/md-1-big-Data.db",
        b"snapshot data",
    );
    write_file(
        data_dir.path(),
        "ks/t1-abcd/snapshots/weekly/md-1-big-Index.db",
        b"snapshot index",
    );
    write_file(
        data_dir.path(),
        "ks/t1-abcd/backups/md-2-big-Data.db",
        b"flushed later",
    );

    run_backup(
        &h.cancel,
        &h.client,
        &h.digest_cache,
        &node(),
        Manifest::skeleton(ManifestType::Snapshot, Seconds(1_600_000_000)),
        &BackupOptions {
            data_dir: data_dir.path().to_path_buf(),
            snapshot_name: Some("weekly".into()),
            delete_backups: false,
        },
    )
    .unwrap();

    run_backup(
        &h.cancel,
        &h.client,
        &h.digest_cache,
        &node(),
        Manifest::skeleton(ManifestType::Incremental, Seconds(1_600_000_100)),
        &BackupOptions {
            data_dir: data_dir.path().to_path_buf(),
            snapshot_name: None,
            delete_backups: false,
        },
    )
    .unwrap();

    let target = tempfile::tempdir().unwrap();
    let options = HostRestoreOptions {
        plan: PlanOptions::default(),
        cluster: "prod".into(),
        hostname: Some("db-1".into()),
        hostname_pattern: None,
        allow_changed: false,
        dry_run: false,
        worker: WorkerOptions::new(
            target.path().join("data"),
            target.path().join("staging"),
            target.path().join("graveyard"),
        ),
    };
    restore_host(&h.cancel, &h.client, &h.digest_cache, &options).unwrap();

    let restored = |rel: &str| std::fs::read(target.path().join("data").join(rel)).unwrap();
    assert_eq!(restored("ks/t1-abcd/md-1-big-Data.db"), b"snapshot data");
    assert_eq!(restored("ks/t1-abcd/md-1-big-Index.db"), b"snapshot index");
    assert_eq!(restored("ks/t1-abcd/md-2-big-Data.db"), b"flushed later");
}

// Incremental cleanup removes flushed sources only after the manifest is
// durable.
#[test]
fn incremental_cleanup_deletes_sources() {
    let h = harness();
    let data_dir = tempfile::tempdir().unwrap();
    write_file(data_dir.path(), "ks/t1-abcd/backups/md-1-big-Data.db", b"bye");
    write_file(data_dir.path(), "ks/t1-abcd/md-9-big-Data.db", b"live stays");

    run_backup(
        &h.cancel,
        &h.client,
        &h.digest_cache,
        &node(),
        Manifest::skeleton(ManifestType::Incremental, Seconds(1_600_000_000)),
        &BackupOptions {
            data_dir: data_dir.path().to_path_buf(),
            snapshot_name: None,
            delete_backups: true,
        },
    )
    .unwrap();

    assert!(!data_dir
        .path()
        .join("ks/t1-abcd/backups/md-1-big-Data.db")
        .exists());
    assert!(data_dir.path().join("ks/t1-abcd/md-9-big-Data.db").exists());
}
