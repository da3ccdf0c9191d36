use std::fs::File;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use md5::{Digest, Md5};
use rusty_s3::actions::{ListObjectsV2, S3Action};
use rusty_s3::{Bucket, Credentials, UrlStyle};

use sstash_types::cancel::CancelToken;
use sstash_types::digest::ForUpload;
use sstash_types::error::{Result, SstashError};
use sstash_types::paranoid::ParanoidFile;
use sstash_types::unixtime::Seconds;

use crate::retry::{retry_http, RetryConfig};
use crate::{within_offsets, ObjectAttrs, ObjectStore};

/// Duration for presigned URL validity.
const PRESIGN_DURATION: Duration = Duration::from_secs(3600);

const COPY_BUF_LEN: usize = 128 * 1024;

const LEGAL_HOLD_HEADER: &str = "x-amz-object-lock-legal-hold";
const RETAIN_UNTIL_HEADER: &str = "x-amz-object-lock-retain-until-date";

/// Presigned-URL S3 adapter.
///
/// The default retention lock comes from configuration rather than a bucket
/// attribute read (querying the object-lock configuration needs a separate
/// privileged API). Heads surface the retention headers when present.
pub struct S3Store {
    bucket: Bucket,
    credentials: Credentials,
    agent: ureq::Agent,
    retry: RetryConfig,
    lock_duration: Duration,
    /// Prefix (root path) prepended to all keys.
    root: String,
}

impl S3Store {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bucket_name: &str,
        region: &str,
        root: &str,
        endpoint: &str,
        access_key_id: &str,
        secret_access_key: &str,
        lock_duration: Duration,
        retry: RetryConfig,
    ) -> Result<Self> {
        let base_url = endpoint
            .parse()
            .map_err(|e| SstashError::Config(format!("invalid S3 endpoint URL '{endpoint}': {e}")))?;

        let bucket = Bucket::new(
            base_url,
            UrlStyle::Path,
            bucket_name.to_string(),
            region.to_string(),
        )
        .map_err(|e| SstashError::Config(format!("failed to create S3 bucket handle: {e}")))?;

        let credentials = Credentials::new(access_key_id, secret_access_key);

        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(30))
            .timeout_read(Duration::from_secs(300))
            .timeout_write(Duration::from_secs(300))
            .build();

        Ok(S3Store {
            bucket,
            credentials,
            agent,
            retry,
            lock_duration,
            root: root.trim_matches('/').to_string(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        if self.root.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.root, key)
        }
    }

    fn strip_root<'a>(&self, key: &'a str) -> &'a str {
        if self.root.is_empty() {
            key
        } else {
            key.strip_prefix(&self.root)
                .map(|k| k.trim_start_matches('/'))
                .unwrap_or(key)
        }
    }

    fn map_err(&self, op: &str, key: &str, e: ureq::Error) -> SstashError {
        match e {
            ureq::Error::Status(404, _) => SstashError::NotFound(key.to_string()),
            ureq::Error::Status(code, _) if code == 429 || code >= 500 => {
                SstashError::Transient(format!("S3 {op} {key}: status {code}"))
            }
            ureq::Error::Status(code, _) => {
                SstashError::Storage(format!("S3 {op} {key}: status {code}"))
            }
            ureq::Error::Transport(t) => SstashError::Transient(format!("S3 {op} {key}: {t}")),
        }
    }

    fn attrs_from_headers(&self, resp: &ureq::Response) -> ObjectAttrs {
        let event_hold = resp
            .header(LEGAL_HOLD_HEADER)
            .is_some_and(|v| v.eq_ignore_ascii_case("ON"));
        let locked_until = resp
            .header(RETAIN_UNTIL_HEADER)
            .and_then(|v| chrono::DateTime::parse_from_rfc3339(v).ok())
            .map(|t| Seconds(t.timestamp()))
            .unwrap_or_default();
        ObjectAttrs {
            event_hold,
            locked_until,
        }
    }

    /// Attrs for a fresh upload when the response carries no retention
    /// headers: a configured lock duration means the bucket applies an
    /// event hold by default, and the caller synthesizes `locked_until`.
    fn attrs_for_put(&self, resp: &ureq::Response) -> ObjectAttrs {
        let mut attrs = self.attrs_from_headers(resp);
        if !attrs.event_hold && attrs.locked_until.is_zero() && !self.lock_duration.is_zero() {
            attrs.event_hold = true;
        }
        attrs
    }
}

impl ObjectStore for S3Store {
    fn head_object(&self, key: &str) -> Result<ObjectAttrs> {
        let full_key = self.full_key(key);
        let url = self
            .bucket
            .head_object(Some(&self.credentials), &full_key)
            .sign(PRESIGN_DURATION);

        let resp = retry_http(&self.retry, &format!("HEAD {key}"), || {
            self.agent.head(url.as_str()).call()
        })
        .map_err(|e| self.map_err("HEAD", key, e))?;
        Ok(self.attrs_from_headers(&resp))
    }

    fn get_bytes(&self, key: &str) -> Result<Vec<u8>> {
        let full_key = self.full_key(key);
        let url = self
            .bucket
            .get_object(Some(&self.credentials), &full_key)
            .sign(PRESIGN_DURATION);

        let resp = retry_http(&self.retry, &format!("GET {key}"), || {
            self.agent.get(url.as_str()).call()
        })
        .map_err(|e| self.map_err("GET", key, e))?;

        let mut buf = Vec::new();
        resp.into_reader().read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn get_file(&self, cancel: &CancelToken, key: &str, out: &mut File) -> Result<()> {
        let full_key = self.full_key(key);
        let url = self
            .bucket
            .get_object(Some(&self.credentials), &full_key)
            .sign(PRESIGN_DURATION);

        let resp = retry_http(&self.retry, &format!("GET {key}"), || {
            self.agent.get(url.as_str()).call()
        })
        .map_err(|e| self.map_err("GET", key, e))?;

        let mut reader = resp.into_reader();
        let mut buf = vec![0u8; COPY_BUF_LEN];
        loop {
            cancel.check()?;
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])?;
        }
        out.flush()?;
        Ok(())
    }

    fn put_bytes(
        &self,
        key: &str,
        content_type: &str,
        content_encoding: &str,
        contents: &[u8],
    ) -> Result<ObjectAttrs> {
        let full_key = self.full_key(key);
        let url = self
            .bucket
            .put_object(Some(&self.credentials), &full_key)
            .sign(PRESIGN_DURATION);

        // The MD5 header makes sure an incomplete upload can't wind up
        // completed.
        let mut hasher = Md5::new();
        hasher.update(contents);
        let content_md5 = STANDARD.encode(hasher.finalize());

        let resp = retry_http(&self.retry, &format!("PUT {key}"), || {
            let mut req = self
                .agent
                .put(url.as_str())
                .set("Content-MD5", &content_md5);
            if !content_type.is_empty() {
                req = req.set("Content-Type", content_type);
            }
            if !content_encoding.is_empty() {
                req = req.set("Content-Encoding", content_encoding);
            }
            req.send_bytes(contents)
        })
        .map_err(|e| self.map_err("PUT", key, e))?;
        Ok(self.attrs_for_put(&resp))
    }

    fn put_file(
        &self,
        cancel: &CancelToken,
        key: &str,
        file: &ParanoidFile,
        digests: &ForUpload,
    ) -> Result<ObjectAttrs> {
        let full_key = self.full_key(key);
        let url = self
            .bucket
            .put_object(Some(&self.credentials), &full_key)
            .sign(PRESIGN_DURATION);

        let content_md5 = STANDARD.encode(digests.md5());
        let expected = digests.content_length();
        let copied = Arc::new(AtomicU64::new(0));

        // A single attempt only: the body reader is consumed by the request,
        // and the caller owns download/upload retry policy.
        let source = file.open()?;
        let guarded = GuardedReader {
            inner: source,
            cancel: cancel.clone(),
            limit: expected,
            copied: Arc::clone(&copied),
        };
        let resp = self
            .agent
            .put(url.as_str())
            .set("Content-MD5", &content_md5)
            .set("Content-Length", &expected.to_string())
            .send(guarded)
            .map_err(|e| {
                if cancel.is_cancelled() {
                    SstashError::Cancelled
                } else {
                    self.map_err("PUT", key, e)
                }
            })?;

        let copied = copied.load(Ordering::SeqCst);
        if copied != expected {
            return Err(SstashError::ShortWrite {
                copied,
                expected,
            });
        }
        Ok(self.attrs_for_put(&resp))
    }

    fn list_objects(
        &self,
        prefix: &str,
        start_offset: &str,
        end_offset: &str,
    ) -> Result<Vec<String>> {
        // ListObjectsV2's start-after is exclusive; the contract here wants
        // an inclusive lower bound, so offsets are applied client-side.
        let full_prefix = self.full_key(prefix);
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut action = self.bucket.list_objects_v2(Some(&self.credentials));
            action.query_mut().insert("prefix", &full_prefix);
            if let Some(ref token) = continuation_token {
                action.query_mut().insert("continuation-token", token);
            }
            let url = action.sign(PRESIGN_DURATION);

            let resp = retry_http(&self.retry, &format!("LIST {prefix}"), || {
                self.agent.get(url.as_str()).call()
            })
            .map_err(|e| self.map_err("LIST", prefix, e))?;

            let mut body = Vec::new();
            resp.into_reader().read_to_end(&mut body)?;

            let body_str = std::str::from_utf8(&body).map_err(|e| {
                SstashError::Storage(format!("S3 LIST {prefix}: invalid UTF-8 response: {e}"))
            })?;
            let parsed = ListObjectsV2::parse_response(body_str).map_err(|e| {
                SstashError::Storage(format!("S3 LIST {prefix}: failed to parse response: {e}"))
            })?;

            for obj in &parsed.contents {
                if obj.key.ends_with('/') {
                    continue;
                }
                let key = self.strip_root(&obj.key).to_string();
                if within_offsets(&key, start_offset, end_offset) {
                    keys.push(key);
                }
            }

            match parsed.next_continuation_token {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn list_prefixes(&self, prefix: &str) -> Result<Vec<String>> {
        let full_prefix = self.full_key(prefix);
        let mut prefixes = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut action = self.bucket.list_objects_v2(Some(&self.credentials));
            action.query_mut().insert("prefix", &full_prefix);
            action.query_mut().insert("delimiter", "/");
            if let Some(ref token) = continuation_token {
                action.query_mut().insert("continuation-token", token);
            }
            let url = action.sign(PRESIGN_DURATION);

            let resp = retry_http(&self.retry, &format!("LIST {prefix}"), || {
                self.agent.get(url.as_str()).call()
            })
            .map_err(|e| self.map_err("LIST", prefix, e))?;

            let mut body = Vec::new();
            resp.into_reader().read_to_end(&mut body)?;

            let body_str = std::str::from_utf8(&body).map_err(|e| {
                SstashError::Storage(format!("S3 LIST {prefix}: invalid UTF-8 response: {e}"))
            })?;
            let parsed = ListObjectsV2::parse_response(body_str).map_err(|e| {
                SstashError::Storage(format!("S3 LIST {prefix}: failed to parse response: {e}"))
            })?;

            for common in &parsed.common_prefixes {
                prefixes.push(self.strip_root(&common.prefix).to_string());
            }

            match parsed.next_continuation_token {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }

        prefixes.sort();
        Ok(prefixes)
    }

    fn lock_duration(&self) -> Duration {
        self.lock_duration
    }
}

/// Upload body reader: aborts when cancellation fires and refuses to stream
/// more than the declared content length, so a file that grew mid-upload
/// fails the request instead of completing with surprise bytes.
struct GuardedReader {
    inner: File,
    cancel: CancelToken,
    limit: u64,
    copied: Arc<AtomicU64>,
}

impl Read for GuardedReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "upload cancelled",
            ));
        }
        let n = self.inner.read(buf)?;
        let total = self.copied.fetch_add(n as u64, Ordering::SeqCst) + n as u64;
        if total > self.limit {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "file grew past its recorded content length during upload",
            ));
        }
        Ok(n)
    }
}
