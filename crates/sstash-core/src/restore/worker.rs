use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use crossbeam_channel::select;
use tracing::{debug, error, info, warn};

use sstash_types::cancel::CancelToken;
use sstash_types::digest::ForRestore;
use sstash_types::error::{Result, SstashError};
use sstash_types::node::NodeIdentity;
use sstash_types::paranoid::ParanoidFile;

use crate::bucket::Client;
use crate::checkpoint::Barrier;
use crate::digestcache::DigestCache;
use crate::limits::{Permit, Semaphore};
use crate::writefile::{lookup_ownership, WriteConfig};

const DOWNLOAD_ATTEMPTS: u32 = 5;

#[derive(Clone, Debug)]
pub struct WorkerOptions {
    pub target_directory: PathBuf,
    pub staging_directory: PathBuf,
    pub graveyard_directory: PathBuf,
    /// Chown created files and directories to `owner_user`.
    pub ensure_ownership: bool,
    pub owner_user: String,
    pub concurrent_download: usize,
    pub concurrent_verify: usize,
    pub no_download_to_staging: bool,
    pub no_link_to_target: bool,
    pub remove_invalid_at_target: bool,
}

impl WorkerOptions {
    pub fn new(
        target_directory: impl Into<PathBuf>,
        staging_directory: impl Into<PathBuf>,
        graveyard_directory: impl Into<PathBuf>,
    ) -> Self {
        WorkerOptions {
            target_directory: target_directory.into(),
            staging_directory: staging_directory.into(),
            graveyard_directory: graveyard_directory.into(),
            ensure_ownership: false,
            owner_user: "cassandra".to_string(),
            concurrent_download: 4,
            concurrent_verify: 1,
            no_download_to_staging: false,
            no_link_to_target: false,
            remove_invalid_at_target: false,
        }
    }
}

/// One restore target: the digest to materialize and the nodes whose
/// namespaces may hold the blob, in preference order.
#[derive(Clone, Debug)]
pub struct DownloadableFile {
    pub digest: ForRestore,
    pub nodes: Vec<NodeIdentity>,
}

pub type WorkerPlan = BTreeMap<String, DownloadableFile>;

#[derive(Clone, Debug, Default)]
pub struct FileStatus {
    pub in_staging: bool,
    pub in_place: bool,
    pub invalid_in_place: bool,
    pub error: Option<String>,
}

/// Materialize a worker plan: stage every unique digest (verified), then,
/// once every task is ready, hard-link staged blobs to their target paths.
/// Per-path failures accumulate into one `FileErrors` map.
pub fn restore(
    cancel: &CancelToken,
    client: &Client,
    digest_cache: &DigestCache,
    plan: WorkerPlan,
    options: &WorkerOptions,
) -> Result<()> {
    struct Task {
        paths: Vec<String>,
        nodes: Vec<NodeIdentity>,
    }

    let mut tasks: BTreeMap<ForRestore, Task> = BTreeMap::new();
    for (name, downloadable) in plan {
        let task = tasks.entry(downloadable.digest).or_insert_with(|| Task {
            paths: Vec::new(),
            nodes: Vec::new(),
        });
        task.nodes.extend(downloadable.nodes);
        task.paths.push(name);
    }
    for task in tasks.values_mut() {
        task.nodes.sort();
        task.nodes.dedup();
        task.paths.sort();
    }

    let ownership = if options.ensure_ownership {
        Some(lookup_ownership(&options.owner_user)?)
    } else {
        None
    };

    let worker = Worker {
        cancel,
        client,
        digest_cache,
        staging: WriteConfig::new(&options.staging_directory).with_ownership(ownership),
        target: WriteConfig::new(&options.target_directory).with_ownership(ownership),
        graveyard: WriteConfig::new(&options.graveyard_directory).with_ownership(ownership),
        download_limiter: Semaphore::new(options.concurrent_download),
        verify_limiter: Semaphore::new(options.concurrent_verify),
        link_ready: Barrier::new(),
        file_status: Mutex::new(BTreeMap::new()),
        no_download_to_staging: options.no_download_to_staging,
        no_link_to_target: options.no_link_to_target,
        remove_invalid_at_target: options.remove_invalid_at_target,
    };

    worker.link_ready.add(tasks.len() as i64);
    std::thread::scope(|s| {
        for (digest, task) in &tasks {
            let worker = &worker;
            s.spawn(move || worker.process_file(&task.paths, *digest, &task.nodes));
        }
    });

    cancel.check()?;
    worker.finish()
}

struct Worker<'a> {
    cancel: &'a CancelToken,
    client: &'a Client,
    digest_cache: &'a DigestCache,

    staging: WriteConfig,
    target: WriteConfig,
    graveyard: WriteConfig,

    download_limiter: Semaphore,
    verify_limiter: Semaphore,

    link_ready: Barrier,

    file_status: Mutex<BTreeMap<String, FileStatus>>,

    no_download_to_staging: bool,
    no_link_to_target: bool,
    remove_invalid_at_target: bool,
}

enum DownloadOutcome {
    Staged,
    Cancelled,
    Failed(String),
}

struct ExistingCheck {
    target_ok: bool,
    bogon_present: bool,
    error: Option<String>,
}

impl ExistingCheck {
    fn missing() -> Self {
        ExistingCheck {
            target_ok: false,
            bogon_present: false,
            error: None,
        }
    }
}

impl Worker<'_> {
    fn finish(self) -> Result<()> {
        let file_status = self.file_status.into_inner().unwrap();

        let mut result = BTreeMap::new();
        let (mut in_place, mut ready_in_staging, mut errored, mut other) = (0u64, 0u64, 0u64, 0u64);
        for (name, status) in file_status {
            if status.in_place {
                in_place += 1;
            } else if status.in_staging {
                ready_in_staging += 1;
            } else if let Some(e) = status.error {
                errored += 1;
                result.insert(name, e);
            } else {
                other += 1;
            }
        }
        info!(in_place, ready_in_staging, errored, other, "restore done");

        if result.is_empty() {
            Ok(())
        } else {
            Err(SstashError::FileErrors(result))
        }
    }

    fn process_file(&self, names: &[String], for_restore: ForRestore, nodes: &[NodeIdentity]) {
        let mut statuses: BTreeMap<String, FileStatus> = names
            .iter()
            .map(|name| (name.clone(), FileStatus::default()))
            .collect();
        self.run_task(names, for_restore, nodes, &mut statuses);
        self.file_status.lock().unwrap().extend(statuses);
    }

    fn run_task(
        &self,
        names: &[String],
        for_restore: ForRestore,
        nodes: &[NodeIdentity],
        statuses: &mut BTreeMap<String, FileStatus>,
    ) {
        let mut in_staging = match self.verify_limiter.acquire(self.cancel) {
            Ok(permit) => self.check_staging(permit, for_restore),
            Err(_) => {
                self.link_ready.abort();
                return;
            }
        };
        if in_staging {
            for status in statuses.values_mut() {
                status.in_staging = true;
            }
        }

        for name in names {
            let permit = match self.verify_limiter.acquire(self.cancel) {
                Ok(permit) => permit,
                Err(_) => {
                    self.link_ready.abort();
                    return;
                }
            };
            let check = self.check_existing(permit, name, for_restore);
            let status = statuses.get_mut(name).unwrap();
            status.in_place = check.target_ok;
            status.invalid_in_place = check.bogon_present;
            if let Some(e) = check.error {
                append_error(status, &e);
            }
        }

        if statuses.values().all(|status| status.in_place) {
            self.link_ready.done();
            return;
        }

        if !in_staging {
            if self.no_download_to_staging {
                info!(digest = %for_restore, ?nodes, "would download");
                self.link_ready.abort();
                return;
            }
            if self.cancel.is_cancelled() {
                return;
            }

            let (staged, err) = self.download_to_staging_from_any(for_restore, nodes);
            for status in statuses.values_mut() {
                if let Some(e) = &err {
                    append_error(status, e);
                }
                status.in_staging = staged;
            }
            in_staging = staged;
        }

        if !in_staging {
            error!(digest = %for_restore, "cannot stage blob");
            self.link_ready.abort();
            return;
        }

        self.link_ready.done();
        let (abort_rx, proceed_rx) = self.link_ready.wait();
        select! {
            recv(self.cancel.done()) -> _ => return,
            recv(abort_rx) -> _ => {
                debug!(digest = %for_restore, "link barrier aborted");
                return;
            }
            recv(proceed_rx) -> _ => {}
        }

        let names_to_link: Vec<&String> = names
            .iter()
            .filter(|name| !statuses[*name].in_place)
            .collect();

        if self.no_link_to_target {
            info!(digest = %for_restore, to_link = ?names_to_link, "would link");
            return;
        }

        for name in names_to_link {
            let status_update = self.link_from_staging(name, for_restore);
            let status = statuses.get_mut(name).unwrap();
            match status_update {
                Ok(()) => {
                    status.in_place = true;
                    status.error = None;
                }
                Err(e) => append_error(status, &e.to_string()),
            }
        }
    }

    fn staging_path(&self, for_restore: &ForRestore) -> PathBuf {
        self.staging.directory.join(for_restore.url_safe())
    }

    /// Verify the staged blob for `for_restore`, if any. A staged file whose
    /// contents hash to something else is renamed to its observed digest's
    /// staging name; the bytes may be exactly what another task wants.
    fn check_staging(&self, permit: Permit<'_>, for_restore: ForRestore) -> bool {
        let _permit = permit;
        let staging_path = self.staging_path(&for_restore);

        let file = match ParanoidFile::capture(&staging_path) {
            Ok(file) => file,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    error!(path = %staging_path.display(), error = %e, "staging check failed");
                }
                return false;
            }
        };
        let for_upload = match self.digest_cache.get(self.cancel, &file) {
            Ok(digests) => digests,
            Err(e) => {
                if !e.is_cancelled() {
                    error!(path = %staging_path.display(), error = %e, "staging digest failed");
                }
                return false;
            }
        };

        if for_upload.for_restore() != for_restore {
            let bogon_path = self.staging_path(&for_upload.for_restore());
            match std::fs::rename(&staging_path, &bogon_path) {
                Ok(()) => {
                    warn!(
                        path = %staging_path.display(),
                        moved_to = %bogon_path.display(),
                        "moved invalid staged file aside"
                    );
                }
                Err(e) => {
                    error!(path = %staging_path.display(), error = %e, "failed to move invalid staged file");
                }
            }
            return false;
        }
        true
    }

    /// Check whether the target path already holds the wanted contents.
    fn check_existing(
        &self,
        permit: Permit<'_>,
        name: &str,
        for_restore: ForRestore,
    ) -> ExistingCheck {
        let _permit = permit;
        let target_path = self.target.directory.join(name);

        let file = match ParanoidFile::capture(&target_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return ExistingCheck::missing(),
            Err(e) => {
                error!(path = %target_path.display(), error = %e, "target check failed");
                return ExistingCheck {
                    target_ok: false,
                    bogon_present: false,
                    error: Some(e.to_string()),
                };
            }
        };
        let for_upload = match self.digest_cache.get(self.cancel, &file) {
            Ok(digests) => digests,
            Err(e) => {
                if e.is_not_found() || e.is_cancelled() {
                    return ExistingCheck::missing();
                }
                error!(path = %target_path.display(), error = %e, "target digest failed");
                return ExistingCheck {
                    target_ok: false,
                    bogon_present: false,
                    error: Some(e.to_string()),
                };
            }
        };

        if for_upload.for_restore() == for_restore {
            return ExistingCheck {
                target_ok: true,
                bogon_present: false,
                error: None,
            };
        }

        if self.remove_invalid_at_target {
            match self.move_to_graveyard(&target_path) {
                Ok(()) => {
                    info!(path = %target_path.display(), "moved invalid target to graveyard");
                    ExistingCheck::missing()
                }
                Err(e) => {
                    error!(path = %target_path.display(), error = %e, "failed to quarantine invalid target");
                    ExistingCheck {
                        target_ok: false,
                        bogon_present: true,
                        error: Some(e.to_string()),
                    }
                }
            }
        } else {
            ExistingCheck {
                target_ok: false,
                bogon_present: true,
                error: None,
            }
        }
    }

    fn move_to_graveyard(&self, target_path: &Path) -> Result<()> {
        self.graveyard.ensure_directory()?;
        let encoded = URL_SAFE.encode(target_path.to_string_lossy().as_bytes());
        let graveyard_path = self.graveyard.directory.join(encoded);
        match std::fs::rename(target_path, &graveyard_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn download_to_staging_from_any(
        &self,
        for_restore: ForRestore,
        nodes: &[NodeIdentity],
    ) -> (bool, Option<String>) {
        let mut errors: Vec<String> = Vec::new();
        for node in nodes {
            let permit = match self.download_limiter.acquire(self.cancel) {
                Ok(permit) => permit,
                Err(_) => return (false, None),
            };
            match self.download_to_staging(permit, for_restore, node) {
                DownloadOutcome::Staged => return (true, None),
                DownloadOutcome::Cancelled => return (false, None),
                DownloadOutcome::Failed(e) => errors.push(format!("{node}: {e}")),
            }
        }

        error!(digest = %for_restore, ?nodes, "download failed from all source nodes");
        if errors.is_empty() {
            (false, Some("no source nodes for digest".to_string()))
        } else {
            (false, Some(errors.join("; ")))
        }
    }

    /// Download into staging through the atomic write-file primitive, then
    /// verify under the staging check. Transient failures retry with a
    /// linear backoff; a missing blob won't heal, so it fails fast.
    fn download_to_staging(
        &self,
        permit: Permit<'_>,
        for_restore: ForRestore,
        node: &NodeIdentity,
    ) -> DownloadOutcome {
        let name = for_restore.url_safe();
        let mut errors: Vec<String> = Vec::new();
        let mut downloaded = false;

        for attempt in 0..DOWNLOAD_ATTEMPTS {
            if attempt > 0 && self.cancel.sleep(Duration::from_secs(attempt as u64)).is_err() {
                return DownloadOutcome::Cancelled;
            }
            info!(digest = %for_restore, source_node = %node, attempt, "download start");
            let attempt_result = self.staging.write_file(&name, |file| {
                self.client
                    .download_blob_no_verify(self.cancel, node, &for_restore, file)
            });
            match attempt_result {
                Ok(()) => {
                    downloaded = true;
                    break;
                }
                Err(e) => {
                    if self.cancel.is_cancelled() {
                        return DownloadOutcome::Cancelled;
                    }
                    error!(digest = %for_restore, source_node = %node, attempt, error = %e, "download failed");
                    let not_found = e.is_not_found();
                    errors.push(e.to_string());
                    if not_found {
                        break;
                    }
                }
            }
        }
        drop(permit);

        if !downloaded {
            return DownloadOutcome::Failed(errors.join("; "));
        }

        let permit = match self.verify_limiter.acquire(self.cancel) {
            Ok(permit) => permit,
            Err(_) => return DownloadOutcome::Cancelled,
        };
        if self.check_staging(permit, for_restore) {
            DownloadOutcome::Staged
        } else {
            DownloadOutcome::Failed("staged file failed verification".to_string())
        }
    }

    fn link_from_staging(&self, name: &str, for_restore: ForRestore) -> Result<()> {
        let staging_path = self.staging_path(&for_restore);
        let target_path = self.target.directory.join(name);

        match std::fs::hard_link(&staging_path, &target_path) {
            Ok(()) => {
                debug!(path = %target_path.display(), "linked from staging");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let parent = target_path.parent().ok_or_else(|| {
                    SstashError::Other(format!("target path has no parent: {name}"))
                })?;
                self.target.for_directory(parent).ensure_directory()?;
                std::fs::hard_link(&staging_path, &target_path)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn append_error(status: &mut FileStatus, message: &str) {
    match &mut status.error {
        Some(existing) => {
            existing.push_str("; ");
            existing.push_str(message);
        }
        None => status.error = Some(message.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use sstash_types::digest::ForUpload;
    use std::io::Cursor;

    struct Fixture {
        _cache_dir: tempfile::TempDir,
        dirs: tempfile::TempDir,
        client: Client,
        digest_cache: DigestCache,
        store: std::sync::Arc<sstash_storage::memory::MemoryStore>,
        node: NodeIdentity,
    }

    impl Fixture {
        fn new() -> Self {
            let (store, client, cache_dir) = testutil::memory_client(Duration::from_secs(86400));
            let storage = crate::cache::CacheStorage::open(cache_dir.path().join("worker")).unwrap();
            let digest_cache = DigestCache::new(&storage);
            Fixture {
                _cache_dir: cache_dir,
                dirs: tempfile::tempdir().unwrap(),
                client,
                digest_cache,
                store,
                node: NodeIdentity::new("prod", "db-1"),
            }
        }

        fn options(&self) -> WorkerOptions {
            WorkerOptions::new(
                self.dirs.path().join("target"),
                self.dirs.path().join("staging"),
                self.dirs.path().join("graveyard"),
            )
        }

        /// Put a blob into the bucket under this fixture's node.
        fn seed_blob(&self, data: &[u8]) -> ForRestore {
            let digests = ForUpload::compute(&mut Cursor::new(data)).unwrap();
            let key = self
                .client
                .layout()
                .absolute_key_for_blob(&self.node, &digests.for_restore());
            self.store.put_bytes(&key, "", "", data).unwrap();
            digests.for_restore()
        }

        fn plan_entry(&self, digest: ForRestore) -> DownloadableFile {
            DownloadableFile {
                digest,
                nodes: vec![self.node.clone()],
            }
        }
    }

    use sstash_storage::ObjectStore;

    #[test]
    fn downloads_verifies_and_links() {
        let fx = Fixture::new();
        let digest = fx.seed_blob(b"restore me");
        let mut plan = WorkerPlan::new();
        plan.insert("ks/t1-ab/md-1-big-Data.db".into(), fx.plan_entry(digest));

        restore(
            &CancelToken::never(),
            &fx.client,
            &fx.digest_cache,
            plan,
            &fx.options(),
        )
        .unwrap();

        let target = fx.dirs.path().join("target/ks/t1-ab/md-1-big-Data.db");
        assert_eq!(std::fs::read(&target).unwrap(), b"restore me");
        // The staged copy stays for future runs.
        let staged = fx.dirs.path().join("staging").join(digest.url_safe());
        assert!(staged.exists());
    }

    #[test]
    fn multiple_paths_one_digest_link_from_one_download() {
        let fx = Fixture::new();
        let digest = fx.seed_blob(b"shared bytes");
        let mut plan = WorkerPlan::new();
        plan.insert("ks/t1-ab/md-1-big-Data.db".into(), fx.plan_entry(digest));
        plan.insert("ks/t2-cd/md-4-big-Data.db".into(), fx.plan_entry(digest));

        restore(
            &CancelToken::never(),
            &fx.client,
            &fx.digest_cache,
            plan,
            &fx.options(),
        )
        .unwrap();

        for path in ["target/ks/t1-ab/md-1-big-Data.db", "target/ks/t2-cd/md-4-big-Data.db"] {
            assert_eq!(std::fs::read(fx.dirs.path().join(path)).unwrap(), b"shared bytes");
        }
    }

    #[test]
    fn staging_mismatch_self_heals() {
        // S5: a file staged under digest dX actually hashes to dY.
        let fx = Fixture::new();
        let wanted = fx.seed_blob(b"the real contents");
        let bogus_digests = ForUpload::compute(&mut Cursor::new(b"impostor")).unwrap();

        let staging = fx.dirs.path().join("staging");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join(wanted.url_safe()), b"impostor").unwrap();

        let mut plan = WorkerPlan::new();
        plan.insert("ks/t1-ab/md-1-big-Data.db".into(), fx.plan_entry(wanted));

        restore(
            &CancelToken::never(),
            &fx.client,
            &fx.digest_cache,
            plan,
            &fx.options(),
        )
        .unwrap();

        // The bogon was renamed to its observed digest's name.
        let moved_aside = staging.join(bogus_digests.for_restore().url_safe());
        assert_eq!(std::fs::read(&moved_aside).unwrap(), b"impostor");
        // The wanted digest was re-downloaded and linked.
        let target = fx.dirs.path().join("target/ks/t1-ab/md-1-big-Data.db");
        assert_eq!(std::fs::read(&target).unwrap(), b"the real contents");
    }

    #[test]
    fn missing_blob_aborts_linking_for_everyone() {
        // S6: one digest is nowhere to be found; the other task must not link.
        let fx = Fixture::new();
        let present = fx.seed_blob(b"present");
        let absent = ForUpload::compute(&mut Cursor::new(b"absent"))
            .unwrap()
            .for_restore();

        let mut plan = WorkerPlan::new();
        plan.insert("ks/t1-ab/md-1-big-Data.db".into(), fx.plan_entry(present));
        plan.insert("ks/t1-ab/md-2-big-Data.db".into(), fx.plan_entry(absent));

        let err = restore(
            &CancelToken::never(),
            &fx.client,
            &fx.digest_cache,
            plan,
            &fx.options(),
        )
        .unwrap_err();

        match err {
            SstashError::FileErrors(map) => {
                assert_eq!(
                    map.keys().collect::<Vec<_>>(),
                    vec!["ks/t1-ab/md-2-big-Data.db"]
                );
            }
            other => panic!("unexpected error: {other}"),
        }

        // The healthy task staged its blob but never linked.
        assert!(fx
            .dirs
            .path()
            .join("staging")
            .join(present.url_safe())
            .exists());
        assert!(!fx
            .dirs
            .path()
            .join("target/ks/t1-ab/md-1-big-Data.db")
            .exists());
    }

    #[test]
    fn target_already_in_place_is_a_noop() {
        let fx = Fixture::new();
        let digest = fx.seed_blob(b"already here");
        let target = fx.dirs.path().join("target/ks/t1-ab/md-1-big-Data.db");
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, b"already here").unwrap();

        let mut plan = WorkerPlan::new();
        plan.insert("ks/t1-ab/md-1-big-Data.db".into(), fx.plan_entry(digest));

        restore(
            &CancelToken::never(),
            &fx.client,
            &fx.digest_cache,
            plan,
            &fx.options(),
        )
        .unwrap();

        // Nothing needed staging.
        assert!(!fx.dirs.path().join("staging").join(digest.url_safe()).exists());
    }

    #[test]
    fn invalid_target_quarantined_when_policy_allows() {
        let fx = Fixture::new();
        let digest = fx.seed_blob(b"good contents");
        let target = fx.dirs.path().join("target/ks/t1-ab/md-1-big-Data.db");
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, b"corrupted").unwrap();

        let mut plan = WorkerPlan::new();
        plan.insert("ks/t1-ab/md-1-big-Data.db".into(), fx.plan_entry(digest));
        let mut options = fx.options();
        options.remove_invalid_at_target = true;

        restore(
            &CancelToken::never(),
            &fx.client,
            &fx.digest_cache,
            plan,
            &options,
        )
        .unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"good contents");
        // The corrupt original landed in the graveyard.
        let graveyard: Vec<_> = std::fs::read_dir(fx.dirs.path().join("graveyard"))
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(graveyard.len(), 1);
        assert_eq!(std::fs::read(graveyard[0].path()).unwrap(), b"corrupted");
    }

    #[test]
    fn staging_only_mode_stages_but_never_links() {
        let fx = Fixture::new();
        let digest = fx.seed_blob(b"stage only");
        let mut plan = WorkerPlan::new();
        plan.insert("ks/t1-ab/md-1-big-Data.db".into(), fx.plan_entry(digest));
        let mut options = fx.options();
        options.no_link_to_target = true;

        restore(
            &CancelToken::never(),
            &fx.client,
            &fx.digest_cache,
            plan,
            &options,
        )
        .unwrap();

        assert!(fx.dirs.path().join("staging").join(digest.url_safe()).exists());
        assert!(!fx.dirs.path().join("target/ks/t1-ab/md-1-big-Data.db").exists());
    }

    #[test]
    fn worker_terminates_under_cancellation() {
        let fx = Fixture::new();
        let digest = fx.seed_blob(b"cancelled");
        let (source, token) = sstash_types::cancel::cancel_pair();
        source.cancel();

        let mut plan = WorkerPlan::new();
        plan.insert("ks/t1-ab/md-1-big-Data.db".into(), fx.plan_entry(digest));

        let err = restore(&token, &fx.client, &fx.digest_cache, plan, &fx.options()).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn tasks_leak_no_permits() {
        let fx = Fixture::new();
        let digest = fx.seed_blob(b"permit check");
        let options = fx.options();
        let cancel = CancelToken::never();

        let worker = Worker {
            cancel: &cancel,
            client: &fx.client,
            digest_cache: &fx.digest_cache,
            staging: WriteConfig::new(&options.staging_directory),
            target: WriteConfig::new(&options.target_directory),
            graveyard: WriteConfig::new(&options.graveyard_directory),
            download_limiter: Semaphore::new(2),
            verify_limiter: Semaphore::new(1),
            link_ready: Barrier::new(),
            file_status: Mutex::new(BTreeMap::new()),
            no_download_to_staging: false,
            no_link_to_target: false,
            remove_invalid_at_target: false,
        };

        // Two tasks: one downloadable digest, one absent (abort path).
        let absent = ForUpload::compute(&mut Cursor::new(b"nope"))
            .unwrap()
            .for_restore();
        worker.link_ready.add(2);
        let good_paths = vec!["ks/t1-ab/md-1-big-Data.db".to_string()];
        let bad_paths = vec!["ks/t1-ab/md-2-big-Data.db".to_string()];
        let nodes = vec![fx.node.clone()];
        std::thread::scope(|s| {
            s.spawn(|| worker.process_file(&good_paths, digest, &nodes));
            s.spawn(|| worker.process_file(&bad_paths, absent, &nodes));
        });

        assert_eq!(worker.download_limiter.in_use(), 0);
        assert_eq!(worker.verify_limiter.in_use(), 0);
        let file_status = worker.file_status.lock().unwrap();
        assert_eq!(file_status.len(), 2);
    }
}
