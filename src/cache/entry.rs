//! Cache Entry Module
//!
//! Defines cache entries, their on-disk header and lifetime arithmetic.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

use crate::error::{CacheError, Result};

// == Header Layout ==
/// Magic bytes opening every entry file
pub const ENTRY_MAGIC: &[u8; 4] = b"FCE1";

/// Size of the fixed header: magic, written_at (u64 LE), lifetime_ms (u64 LE)
pub const HEADER_LEN: usize = 4 + 8 + 8;

// == Entry Header ==
/// Write time and lifetime of a stored entry.
///
/// Stored ahead of the encoded value so freshness can be decided without
/// decoding the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    /// Write timestamp (Unix milliseconds)
    pub written_at: u64,
    /// Effective lifetime in milliseconds
    pub lifetime_ms: u64,
}

impl EntryHeader {
    // == Constructor ==
    /// Creates a header for an entry written at `now` with `lifetime`.
    pub fn new(now: u64, lifetime: Duration) -> Self {
        Self {
            written_at: now,
            lifetime_ms: duration_to_ms(lifetime),
        }
    }

    /// Returns the stored lifetime.
    pub fn lifetime(&self) -> Duration {
        Duration::from_millis(self.lifetime_ms)
    }

    /// Expiration timestamp (Unix milliseconds).
    pub fn expires_at(&self) -> u64 {
        self.written_at.saturating_add(self.lifetime_ms)
    }

    /// Expiration timestamp with the lifetime capped at `max_lifetime`.
    pub fn expires_at_capped(&self, max_lifetime: Duration) -> u64 {
        let lifetime = self.lifetime_ms.min(duration_to_ms(max_lifetime));
        self.written_at.saturating_add(lifetime)
    }

    /// Expiration time as a UTC datetime.
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        i64::try_from(self.expires_at())
            .ok()
            .and_then(DateTime::from_timestamp_millis)
    }

    // == Is Expired ==
    /// Checks if the entry has expired at `now`.
    ///
    /// Boundary condition: an entry is expired once `now >= expires_at`, so a
    /// zero lifetime is expired the instant it is written.
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at()
    }

    // == Encode / Decode ==
    /// Serializes the header into its fixed-size byte layout.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[..4].copy_from_slice(ENTRY_MAGIC);
        bytes[4..12].copy_from_slice(&self.written_at.to_le_bytes());
        bytes[12..20].copy_from_slice(&self.lifetime_ms.to_le_bytes());
        bytes
    }

    /// Parses a header from the start of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(CacheError::Decode(format!(
                "entry is {} bytes, header needs {}",
                bytes.len(),
                HEADER_LEN
            )));
        }
        if &bytes[..4] != ENTRY_MAGIC {
            return Err(CacheError::Decode("bad entry magic".to_string()));
        }

        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[4..12]);
        let written_at = u64::from_le_bytes(word);
        word.copy_from_slice(&bytes[12..20]);
        let lifetime_ms = u64::from_le_bytes(word);

        Ok(Self {
            written_at,
            lifetime_ms,
        })
    }
}

// == Cache Entry ==
/// A decoded cache entry: the value plus its write metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// Write timestamp (Unix milliseconds)
    pub written_at: u64,
    /// Effective lifetime chosen at write time
    pub lifetime: Duration,
}

impl<V> CacheEntry<V> {
    /// Builds an entry from a parsed header and its decoded value.
    pub fn from_header(header: EntryHeader, value: V) -> Self {
        Self {
            value,
            written_at: header.written_at,
            lifetime: header.lifetime(),
        }
    }

    /// Returns the header describing this entry.
    pub fn header(&self) -> EntryHeader {
        EntryHeader::new(self.written_at, self.lifetime)
    }

    /// Expiration timestamp (Unix milliseconds).
    pub fn expires_at(&self) -> u64 {
        self.header().expires_at()
    }

    /// Expiration time as a UTC datetime.
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        self.header().expires_at_utc()
    }

    /// True while `now < expires_at`.
    pub fn is_fresh_at(&self, now: u64) -> bool {
        !self.header().is_expired_at(now)
    }

    // == Time To Live ==
    /// Returns remaining lifetime in milliseconds, `0` once expired.
    pub fn ttl_remaining_ms(&self) -> u64 {
        self.expires_at().saturating_sub(current_timestamp_ms())
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(duration_to_ms)
        .unwrap_or(0)
}

/// Converts a signed number of seconds into a lifetime.
///
/// Zero, negative and NaN inputs become `Duration::ZERO`; values too large to
/// represent saturate.
pub fn lifetime_from_secs(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_header_layout() {
        let header = EntryHeader::new(1_700_000_000_000, Duration::from_secs(60));
        let bytes = header.to_bytes();

        assert_eq!(&bytes[..4], b"FCE1");
        assert_eq!(EntryHeader::from_bytes(&bytes).unwrap(), header);
        assert_eq!(header.lifetime_ms, 60_000);
        assert_eq!(header.expires_at(), 1_700_000_060_000);
    }

    #[test]
    fn test_header_parse_ignores_trailing_payload() {
        let header = EntryHeader::new(42, Duration::from_millis(7));
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(b"\"payload\"");

        assert_eq!(EntryHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_header_rejects_short_input() {
        let result = EntryHeader::from_bytes(b"FCE1\x00\x01");
        assert!(matches!(result, Err(CacheError::Decode(_))));
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut bytes = EntryHeader::new(1, Duration::from_secs(1)).to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            EntryHeader::from_bytes(&bytes),
            Err(CacheError::Decode(_))
        ));
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let header = EntryHeader::new(1_000, Duration::from_millis(500));

        assert!(!header.is_expired_at(1_499));
        assert!(header.is_expired_at(1_500), "expired exactly at expires_at");
        assert!(header.is_expired_at(2_000));
    }

    #[test]
    fn test_zero_lifetime_is_immediately_stale() {
        let header = EntryHeader::new(1_000, Duration::ZERO);
        assert!(header.is_expired_at(1_000));
    }

    #[test]
    fn test_expires_at_saturates() {
        let header = EntryHeader::new(u64::MAX - 10, Duration::from_secs(60));
        assert_eq!(header.expires_at(), u64::MAX);
    }

    #[test]
    fn test_expires_at_capped() {
        let header = EntryHeader::new(1_000, Duration::from_secs(100));
        assert_eq!(header.expires_at_capped(Duration::from_secs(10)), 11_000);
        assert_eq!(header.expires_at_capped(Duration::from_secs(1000)), 101_000);
    }

    #[test]
    fn test_entry_freshness() {
        let now = current_timestamp_ms();
        let entry = CacheEntry {
            value: "test_value".to_string(),
            written_at: now,
            lifetime: Duration::from_secs(10),
        };

        assert!(entry.is_fresh_at(now));
        assert!(!entry.is_fresh_at(now + 10_000));

        let remaining = entry.ttl_remaining_ms();
        assert!(remaining <= 10_000);
        assert!(remaining >= 9_000);
    }

    #[test]
    fn test_ttl_remaining_expired() {
        let entry = CacheEntry {
            value: 1u32,
            written_at: current_timestamp_ms(),
            lifetime: Duration::from_millis(50),
        };

        sleep(Duration::from_millis(100));

        assert_eq!(entry.ttl_remaining_ms(), 0);
    }

    #[test]
    fn test_expires_at_utc() {
        let entry = CacheEntry {
            value: (),
            written_at: 0,
            lifetime: Duration::from_secs(86_400),
        };
        let expires = entry.expires_at_utc().unwrap();
        assert_eq!(expires.to_rfc3339(), "1970-01-02T00:00:00+00:00");
    }

    #[test]
    fn test_lifetime_from_secs() {
        assert_eq!(lifetime_from_secs(1.5), Duration::from_millis(1500));
        assert_eq!(lifetime_from_secs(0.0), Duration::ZERO);
        assert_eq!(lifetime_from_secs(-30.0), Duration::ZERO);
        assert_eq!(lifetime_from_secs(f64::NAN), Duration::ZERO);
        assert_eq!(lifetime_from_secs(f64::INFINITY), Duration::MAX);
    }
}
