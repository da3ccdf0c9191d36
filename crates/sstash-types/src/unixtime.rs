use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SstashError};

/// Absolute wall-clock time in whole unix seconds.
///
/// The decimal rendering is the leading segment of manifest file names, so
/// listings over a manifest prefix sort chronologically as long as the digit
/// count is stable (10 digits through the year 2286).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Seconds(pub i64);

impl Seconds {
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Seconds(secs)
    }

    pub fn add(self, d: Duration) -> Self {
        Seconds(self.0.saturating_add(d.as_secs() as i64))
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn decimal(self) -> String {
        self.0.to_string()
    }

    /// Fixed-width big-endian encoding used as a cache value.
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(data: &[u8]) -> Result<Self> {
        let bytes: [u8; 8] = data
            .try_into()
            .map_err(|_| SstashError::Encoding(format!("seconds value of {} bytes", data.len())))?;
        Ok(Seconds(i64::from_be_bytes(bytes)))
    }
}

impl fmt::Display for Seconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_round_trip() {
        for v in [0i64, 1, 1_600_000_000, i64::MAX, -1] {
            let s = Seconds(v);
            assert_eq!(Seconds::from_be_bytes(&s.to_be_bytes()).unwrap(), s);
        }
    }

    #[test]
    fn from_be_bytes_rejects_bad_length() {
        assert!(Seconds::from_be_bytes(&[0u8; 7]).is_err());
        assert!(Seconds::from_be_bytes(&[0u8; 9]).is_err());
    }

    #[test]
    fn add_duration() {
        let s = Seconds(100).add(Duration::from_secs(12 * 3600));
        assert_eq!(s, Seconds(100 + 12 * 3600));
    }

    #[test]
    fn ordering_matches_decimal_ordering_for_same_width() {
        let a = Seconds(1_600_000_000);
        let b = Seconds(1_600_000_001);
        assert!(a < b);
        assert!(a.decimal() < b.decimal());
    }
}
