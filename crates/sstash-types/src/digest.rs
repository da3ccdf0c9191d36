use std::fmt;
use std::io::Read;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use blake2::{Blake2b512, Digest};
use md5::Md5;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, SstashError};

pub const STRONG_DIGEST_LEN: usize = 32;
pub const MD5_DIGEST_LEN: usize = 16;

/// Encoded length of a [`ForUpload`]: strong digest + MD5 + content length.
pub const FOR_UPLOAD_ENCODED_LEN: usize = STRONG_DIGEST_LEN + MD5_DIGEST_LEN + 8;

const READ_BUF_LEN: usize = 128 * 1024;

/// The bucket-key primitive: a strong content digest, BLAKE2b-512 truncated
/// to 32 bytes. Identical file contents produce identical keys regardless of
/// which node uploaded them or when.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ForRestore(pub [u8; STRONG_DIGEST_LEN]);

impl ForRestore {
    /// Lowercase hex, used in bucket blob keys.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// URL-safe base64 (padded), used for staging file names.
    pub fn url_safe(&self) -> String {
        URL_SAFE.encode(self.0)
    }

    pub fn from_url_safe(encoded: &str) -> Result<Self> {
        let raw = URL_SAFE
            .decode(encoded)
            .map_err(|e| SstashError::Encoding(format!("digest '{encoded}': {e}")))?;
        Self::from_slice(&raw)
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self> {
        let bytes: [u8; STRONG_DIGEST_LEN] = raw
            .try_into()
            .map_err(|_| SstashError::Encoding(format!("digest of {} bytes", raw.len())))?;
        Ok(ForRestore(bytes))
    }

    /// Fixed-width binary encoding, used as an existence-cache key.
    pub fn marshal(&self) -> [u8; STRONG_DIGEST_LEN] {
        self.0
    }

    /// Re-hash `reader` and require equality with this digest.
    pub fn verify<R: Read>(&self, reader: &mut R) -> Result<()> {
        let mut hasher = Blake2b512::new();
        let mut buf = vec![0u8; READ_BUF_LEN];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let observed = truncate_strong(&hasher.finalize());
        if observed != self.0 {
            return Err(SstashError::DigestMismatch {
                expected: self.to_hex(),
                observed: hex::encode(observed),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for ForRestore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ForRestore({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ForRestore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl Serialize for ForRestore {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.url_safe())
    }
}

impl<'de> Deserialize<'de> for ForRestore {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ForRestore::from_url_safe(&s).map_err(D::Error::custom)
    }
}

/// Everything the uploader needs about a file's contents: the strong digest,
/// the RFC 1864 MD5 used as an upload integrity guard, and the byte length.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ForUpload {
    strong: [u8; STRONG_DIGEST_LEN],
    md5: [u8; MD5_DIGEST_LEN],
    content_length: u64,
}

impl ForUpload {
    /// Stream `reader` to completion through both hashers in one pass.
    pub fn compute<R: Read>(reader: &mut R) -> Result<Self> {
        let mut hasher = DigestHasher::new();
        let mut buf = vec![0u8; READ_BUF_LEN];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }

    /// Projection to the bucket-key primitive.
    pub fn for_restore(&self) -> ForRestore {
        ForRestore(self.strong)
    }

    pub fn md5(&self) -> [u8; MD5_DIGEST_LEN] {
        self.md5
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn url_safe(&self) -> String {
        self.for_restore().url_safe()
    }

    /// Fixed-width binary encoding, used as a digest-cache value.
    pub fn marshal(&self) -> [u8; FOR_UPLOAD_ENCODED_LEN] {
        let mut out = [0u8; FOR_UPLOAD_ENCODED_LEN];
        out[..STRONG_DIGEST_LEN].copy_from_slice(&self.strong);
        out[STRONG_DIGEST_LEN..STRONG_DIGEST_LEN + MD5_DIGEST_LEN].copy_from_slice(&self.md5);
        out[STRONG_DIGEST_LEN + MD5_DIGEST_LEN..].copy_from_slice(&self.content_length.to_be_bytes());
        out
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        if data.len() != FOR_UPLOAD_ENCODED_LEN {
            return Err(SstashError::Encoding(format!(
                "upload digest of {} bytes",
                data.len()
            )));
        }
        let mut strong = [0u8; STRONG_DIGEST_LEN];
        strong.copy_from_slice(&data[..STRONG_DIGEST_LEN]);
        let mut md5 = [0u8; MD5_DIGEST_LEN];
        md5.copy_from_slice(&data[STRONG_DIGEST_LEN..STRONG_DIGEST_LEN + MD5_DIGEST_LEN]);
        let mut len_bytes = [0u8; 8];
        len_bytes.copy_from_slice(&data[STRONG_DIGEST_LEN + MD5_DIGEST_LEN..]);
        Ok(ForUpload {
            strong,
            md5,
            content_length: u64::from_be_bytes(len_bytes),
        })
    }
}

impl fmt::Debug for ForUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ForUpload({}, {} bytes)",
            &self.for_restore().to_hex()[..16],
            self.content_length
        )
    }
}

/// JSON wire shape for manifests: digests as URL-safe base64 strings.
#[derive(Serialize, Deserialize)]
struct ForUploadWire {
    blake2b: String,
    md5: String,
    length: u64,
}

impl Serialize for ForUpload {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        ForUploadWire {
            blake2b: URL_SAFE.encode(self.strong),
            md5: URL_SAFE.encode(self.md5),
            length: self.content_length,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ForUpload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let wire = ForUploadWire::deserialize(deserializer)?;
        let strong = URL_SAFE
            .decode(&wire.blake2b)
            .map_err(D::Error::custom)?
            .try_into()
            .map_err(|_| D::Error::custom("blake2b digest must be 32 bytes"))?;
        let md5 = URL_SAFE
            .decode(&wire.md5)
            .map_err(D::Error::custom)?
            .try_into()
            .map_err(|_| D::Error::custom("md5 digest must be 16 bytes"))?;
        Ok(ForUpload {
            strong,
            md5,
            content_length: wire.length,
        })
    }
}

/// Incremental dual hasher so callers can interleave reads with cancellation
/// checks instead of handing over a whole reader.
pub struct DigestHasher {
    strong: Blake2b512,
    md5: Md5,
    content_length: u64,
}

impl DigestHasher {
    pub fn new() -> Self {
        DigestHasher {
            strong: Blake2b512::new(),
            md5: Md5::new(),
            content_length: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.strong.update(data);
        self.md5.update(data);
        self.content_length += data.len() as u64;
    }

    pub fn finalize(self) -> ForUpload {
        let mut md5 = [0u8; MD5_DIGEST_LEN];
        md5.copy_from_slice(&self.md5.finalize());
        ForUpload {
            strong: truncate_strong(&self.strong.finalize()),
            md5,
            content_length: self.content_length,
        }
    }
}

impl Default for DigestHasher {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_strong(full: &[u8]) -> [u8; STRONG_DIGEST_LEN] {
    let mut out = [0u8; STRONG_DIGEST_LEN];
    out.copy_from_slice(&full[..STRONG_DIGEST_LEN]);
    out
}
