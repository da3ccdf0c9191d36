pub mod local;
pub mod memory;
pub mod retry;
pub mod s3;

use std::fs::File;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use sstash_types::cancel::CancelToken;
use sstash_types::digest::ForUpload;
use sstash_types::error::{Result, SstashError};
use sstash_types::paranoid::ParanoidFile;
use sstash_types::unixtime::Seconds;

/// Retention metadata returned by head/put operations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ObjectAttrs {
    /// The object is held until an event releases it; the caller synthesizes
    /// a `locked_until` from the store's default lock duration.
    pub event_hold: bool,
    /// Absolute retention expiry, zero when the store reported none.
    pub locked_until: Seconds,
}

/// Vendor-independent capability set of the bucket.
///
/// Key-space contract: keys are `/`-separated strings. `list_objects` is
/// half-open `[start_offset, end_offset)` on plain string order with an
/// INCLUSIVE lower bound; adapters whose native API offers only an exclusive
/// start (S3 `start-after`) must filter client-side. Empty offsets mean
/// unbounded.
pub trait ObjectStore: Send + Sync {
    /// Stat an object. `SstashError::is_not_found` must hold for missing keys.
    fn head_object(&self, key: &str) -> Result<ObjectAttrs>;

    fn get_bytes(&self, key: &str) -> Result<Vec<u8>>;

    /// Stream an object into an open writable file.
    fn get_file(&self, cancel: &CancelToken, key: &str, out: &mut File) -> Result<()>;

    /// Store a small document. Sets the MD5 header from the contents so an
    /// incomplete upload cannot complete.
    fn put_bytes(
        &self,
        key: &str,
        content_type: &str,
        content_encoding: &str,
        contents: &[u8],
    ) -> Result<ObjectAttrs>;

    /// Upload a file, guarded by the precomputed MD5 and exact content
    /// length: if the bytes streamed differ from `digests.content_length()`,
    /// the upload must fail rather than complete short.
    fn put_file(
        &self,
        cancel: &CancelToken,
        key: &str,
        file: &ParanoidFile,
        digests: &ForUpload,
    ) -> Result<ObjectAttrs>;

    fn list_objects(&self, prefix: &str, start_offset: &str, end_offset: &str)
        -> Result<Vec<String>>;

    /// One level of common prefixes under `prefix` (delimiter `/`).
    fn list_prefixes(&self, prefix: &str) -> Result<Vec<String>>;

    /// Default retention lock applied to new uploads, inferred once at open.
    /// Zero when the bucket has no lock configured.
    fn lock_duration(&self) -> Duration;
}

impl ObjectStore for Arc<dyn ObjectStore> {
    fn head_object(&self, key: &str) -> Result<ObjectAttrs> {
        (**self).head_object(key)
    }
    fn get_bytes(&self, key: &str) -> Result<Vec<u8>> {
        (**self).get_bytes(key)
    }
    fn get_file(&self, cancel: &CancelToken, key: &str, out: &mut File) -> Result<()> {
        (**self).get_file(cancel, key, out)
    }
    fn put_bytes(
        &self,
        key: &str,
        content_type: &str,
        content_encoding: &str,
        contents: &[u8],
    ) -> Result<ObjectAttrs> {
        (**self).put_bytes(key, content_type, content_encoding, contents)
    }
    fn put_file(
        &self,
        cancel: &CancelToken,
        key: &str,
        file: &ParanoidFile,
        digests: &ForUpload,
    ) -> Result<ObjectAttrs> {
        (**self).put_file(cancel, key, file, digests)
    }
    fn list_objects(
        &self,
        prefix: &str,
        start_offset: &str,
        end_offset: &str,
    ) -> Result<Vec<String>> {
        (**self).list_objects(prefix, start_offset, end_offset)
    }
    fn list_prefixes(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).list_prefixes(prefix)
    }
    fn lock_duration(&self) -> Duration {
        (**self).lock_duration()
    }
}

/// Offset filter shared by adapters that list client-side.
pub(crate) fn within_offsets(key: &str, start_offset: &str, end_offset: &str) -> bool {
    if !start_offset.is_empty() && key < start_offset {
        return false;
    }
    if !end_offset.is_empty() && key >= end_offset {
        return false;
    }
    true
}

/// Construction-time configuration for the store factory.
#[derive(Clone, Debug, Default)]
pub struct StoreConfig {
    /// `s3://endpoint[:port]/bucket[/root]`, `file:///path`, or `memory:`.
    pub url: String,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Default retention lock the bucket applies to new objects.
    pub lock_duration: Duration,
    pub retry: retry::RetryConfig,
}

/// Build an object store from configuration. Selects the adapter by URL
/// scheme; unknown schemes are a configuration error.
pub fn store_from_config(cfg: &StoreConfig) -> Result<Arc<dyn ObjectStore>> {
    let trimmed = cfg.url.trim();
    if trimmed.is_empty() {
        return Err(SstashError::Config("bucket URL must not be empty".into()));
    }
    if trimmed == "memory:" {
        return Ok(Arc::new(memory::MemoryStore::new(cfg.lock_duration)));
    }
    if trimmed.starts_with('/') || trimmed.starts_with("./") {
        return Ok(Arc::new(local::LocalStore::new(trimmed)?));
    }

    let url = Url::parse(trimmed)
        .map_err(|e| SstashError::Config(format!("invalid bucket URL '{trimmed}': {e}")))?;
    match url.scheme() {
        "file" => Ok(Arc::new(local::LocalStore::new(url.path())?)),
        "s3" | "s3+https" => s3_from_url(cfg, &url, "https"),
        "s3+http" => s3_from_url(cfg, &url, "http"),
        other => Err(SstashError::Config(format!(
            "unsupported bucket URL scheme: '{other}'"
        ))),
    }
}

fn s3_from_url(cfg: &StoreConfig, url: &Url, endpoint_scheme: &str) -> Result<Arc<dyn ObjectStore>> {
    let host = url
        .host_str()
        .ok_or_else(|| SstashError::Config("s3 URL is missing an endpoint host".into()))?;
    let port_suffix = url.port().map(|p| format!(":{p}")).unwrap_or_default();
    let endpoint = format!("{endpoint_scheme}://{host}{port_suffix}");

    let path = url.path().trim_start_matches('/');
    let (bucket, root) = path.split_once('/').unwrap_or((path, ""));
    if bucket.is_empty() {
        return Err(SstashError::Config(
            "s3 URL must include a bucket in the path (expected s3://endpoint/bucket[/root])"
                .into(),
        ));
    }

    let access_key_id = cfg
        .access_key_id
        .as_deref()
        .ok_or_else(|| SstashError::Config("S3 requires an access key id".into()))?;
    let secret_access_key = cfg
        .secret_access_key
        .as_deref()
        .ok_or_else(|| SstashError::Config("S3 requires a secret access key".into()))?;

    Ok(Arc::new(s3::S3Store::new(
        bucket,
        cfg.region.as_deref().unwrap_or("us-east-1"),
        root,
        &endpoint,
        access_key_id,
        secret_access_key,
        cfg.lock_duration,
        cfg.retry.clone(),
    )?))
}
