use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use sstash_types::digest::ForUpload;
use sstash_types::error::{Result, SstashError};
use sstash_types::unixtime::Seconds;

/// What a manifest records about a backup run.
///
/// `Incomplete` marks a run that started but has not finalized; the restore
/// planner never selects one. Writing an `Invalid` manifest is a programming
/// error and panics at the bucket client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestType {
    Invalid,
    Incomplete,
    Incremental,
    Snapshot,
}

impl ManifestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManifestType::Invalid => "invalid",
            ManifestType::Incomplete => "incomplete",
            ManifestType::Incremental => "incremental",
            ManifestType::Snapshot => "snapshot",
        }
    }

    fn from_file_name_part(part: &str) -> Result<Self> {
        match part {
            "incomplete" => Ok(ManifestType::Incomplete),
            "incremental" => Ok(ManifestType::Incremental),
            "snapshot" => Ok(ManifestType::Snapshot),
            other => Err(SstashError::Encoding(format!(
                "unknown manifest type '{other}'"
            ))),
        }
    }
}

impl fmt::Display for ManifestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one manifest within a node's stream. The canonical file name
/// is `<decimal-seconds>-<type>-<nonce>`; time-range listings rely on the
/// decimal seconds leading that name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ManifestKey {
    pub time: Seconds,
    pub manifest_type: ManifestType,
    pub nonce: String,
}

impl ManifestKey {
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}",
            self.time.decimal(),
            self.manifest_type.as_str(),
            self.nonce
        )
    }

    pub fn from_file_name(name: &str) -> Result<Self> {
        let mut parts = name.splitn(3, '-');
        let time_part = parts.next().unwrap_or_default();
        let type_part = parts
            .next()
            .ok_or_else(|| SstashError::Encoding(format!("manifest name '{name}'")))?;
        let nonce = parts
            .next()
            .ok_or_else(|| SstashError::Encoding(format!("manifest name '{name}'")))?;
        if nonce.is_empty() {
            return Err(SstashError::Encoding(format!("manifest name '{name}'")));
        }
        let seconds: i64 = time_part
            .parse()
            .map_err(|_| SstashError::Encoding(format!("manifest time '{time_part}'")))?;
        Ok(ManifestKey {
            time: Seconds(seconds),
            manifest_type: ManifestType::from_file_name_part(type_part)?,
            nonce: nonce.to_string(),
        })
    }
}

impl fmt::Display for ManifestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// One backup run's record: the mapping from table-relative paths to content
/// digests, plus enough node metadata to make the stream self-describing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub time: Seconds,
    #[serde(rename = "type")]
    pub manifest_type: ManifestType,
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitioner: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tokens: Vec<String>,
    #[serde(default)]
    pub files: BTreeMap<String, ForUpload>,
}

impl Manifest {
    /// Start a manifest for a run happening now; files are filled in by the
    /// backup processor.
    pub fn skeleton(manifest_type: ManifestType, time: Seconds) -> Self {
        Manifest {
            time,
            manifest_type,
            nonce: generate_nonce(),
            address: None,
            partitioner: None,
            tokens: Vec::new(),
            files: BTreeMap::new(),
        }
    }

    pub fn key(&self) -> ManifestKey {
        ManifestKey {
            time: self.time,
            manifest_type: self.manifest_type,
            nonce: self.nonce.clone(),
        }
    }
}

fn generate_nonce() -> String {
    format!("{:016x}", rand::random::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sstash_types::digest::ForUpload;
    use std::io::Cursor;

    #[test]
    fn file_name_round_trip() {
        let key = ManifestKey {
            time: Seconds(1_600_000_000),
            manifest_type: ManifestType::Incremental,
            nonce: "d2a9f00b1c44e0aa".into(),
        };
        let name = key.file_name();
        assert_eq!(name, "1600000000-incremental-d2a9f00b1c44e0aa");
        assert_eq!(ManifestKey::from_file_name(&name).unwrap(), key);
    }

    #[test]
    fn file_name_rejects_garbage() {
        for bad in ["", "123", "abc-incremental-x", "123-unknown-x", "123-snapshot-"] {
            assert!(ManifestKey::from_file_name(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn nonce_survives_type_dashes_absence() {
        // Nonces may themselves contain dashes; splitn keeps them whole.
        let key = ManifestKey::from_file_name("5-snapshot-a-b-c").unwrap();
        assert_eq!(key.nonce, "a-b-c");
        assert_eq!(key.file_name(), "5-snapshot-a-b-c");
    }

    #[test]
    fn keys_order_by_time_first() {
        let early = ManifestKey {
            time: Seconds(100),
            manifest_type: ManifestType::Snapshot,
            nonce: "zz".into(),
        };
        let late = ManifestKey {
            time: Seconds(200),
            manifest_type: ManifestType::Incremental,
            nonce: "aa".into(),
        };
        assert!(early < late);
    }

    #[test]
    fn skeleton_has_unique_nonce() {
        let a = Manifest::skeleton(ManifestType::Snapshot, Seconds(1));
        let b = Manifest::skeleton(ManifestType::Snapshot, Seconds(1));
        assert_ne!(a.nonce, b.nonce);
        assert_eq!(a.key().time, Seconds(1));
    }

    #[test]
    fn manifest_json_round_trip() {
        let mut manifest = Manifest::skeleton(ManifestType::Incremental, Seconds(1_600_000_000));
        manifest.address = Some("10.0.0.1".into());
        manifest.tokens = vec!["-9223372036854775808".into()];
        let digests = ForUpload::compute(&mut Cursor::new(b"hello")).unwrap();
        manifest
            .files
            .insert("ks/t1-abcd/md-1-big-Data.db".into(), digests);

        let json = serde_json::to_string(&manifest).unwrap();
        let back: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.key(), manifest.key());
        assert_eq!(back.files, manifest.files);
        assert_eq!(back.tokens, manifest.tokens);
    }
}
