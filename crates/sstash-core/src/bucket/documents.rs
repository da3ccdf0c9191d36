use std::io::Read;
use std::time::Duration;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use sstash_storage::ObjectStore;
use sstash_types::cancel::CancelToken;
use sstash_types::error::{Result, SstashError};

pub(super) const PUT_JSON_RETRIES_LIMIT: u32 = 3;
pub(super) const GET_JSON_RETRIES_LIMIT: u32 = 3;
pub(super) const LIST_MANIFESTS_RETRIES_LIMIT: u32 = 3;
const RETRY_SLEEP_PER_ATTEMPT: Duration = Duration::from_secs(1);

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

use super::Client;

impl Client {
    /// Store a JSON document gzip-compressed, with content type and encoding
    /// set so stores that transcode behave.
    pub(super) fn put_document<T: Serialize>(
        &self,
        cancel: &CancelToken,
        absolute_key: &str,
        document: &T,
    ) -> Result<()> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        serde_json::to_writer(&mut encoder, document)
            .map_err(|e| SstashError::Serialization(e.to_string()))?;
        let body = encoder.finish()?;

        self.with_retries(cancel, PUT_JSON_RETRIES_LIMIT, "put_document", || {
            self.store()
                .put_bytes(absolute_key, "application/json", "gzip", &body)
                .map(|_| ())
        })
    }

    pub(super) fn get_document<T: DeserializeOwned>(
        &self,
        cancel: &CancelToken,
        absolute_key: &str,
    ) -> Result<T> {
        let contents = self.with_retries(cancel, GET_JSON_RETRIES_LIMIT, "get_document", || {
            self.store().get_bytes(absolute_key)
        })?;

        // Some stores hand back the stored gzip body, others transcode it
        // away; accept both.
        let decoded = if contents.starts_with(&GZIP_MAGIC) {
            let mut decoder = GzDecoder::new(&contents[..]);
            let mut plain = Vec::new();
            decoder.read_to_end(&mut plain)?;
            plain
        } else {
            contents
        };

        serde_json::from_slice(&decoded).map_err(|e| SstashError::Serialization(e.to_string()))
    }

    /// Linear-backoff retry for document and listing calls: transient
    /// failures sleep `attempt` seconds between tries, respecting
    /// cancellation; anything else propagates immediately.
    pub(super) fn with_retries<T>(
        &self,
        cancel: &CancelToken,
        limit: u32,
        op_name: &str,
        f: impl Fn() -> Result<T>,
    ) -> Result<T> {
        let mut last_err = None;
        for attempt in 0..limit {
            if attempt > 0 {
                cancel.sleep(RETRY_SLEEP_PER_ATTEMPT * attempt)?;
            }
            cancel.check()?;
            match f() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < limit => {
                    warn!(op = op_name, attempt, error = %e, "transient document error, retrying");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap())
    }
}
