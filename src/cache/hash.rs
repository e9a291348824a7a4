//! Content hash used to address the persistent cache.

use std::fmt;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

/// Bumped whenever the persisted variant layout or the key layout changes.
pub const CACHE_VERSION_TAG: &[u8] = b"myth-variants/v2";

/// A 128-bit content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheHash(pub u128);

impl CacheHash {
    /// Hashes everything a compiled variant's bits depend on.
    ///
    /// `program_hash` covers the program's IR and static info. `key_bytes`
    /// must be the key's portable image (program ids zeroed): ids are
    /// session-local and would defeat reuse across runs.
    #[must_use]
    pub fn compute(backend_tag: &str, compaction: bool, program_hash: u128, key_bytes: &[u8]) -> Self {
        let mut hasher = Xxh3::new();
        hasher.update(CACHE_VERSION_TAG);
        hasher.update(&(backend_tag.len() as u32).to_le_bytes());
        hasher.update(backend_tag.as_bytes());
        hasher.update(&[u8::from(compaction)]);
        hasher.update(&program_hash.to_le_bytes());
        hasher.update(key_bytes);
        Self(hasher.digest128())
    }

    /// Parses the 32-digit lowercase form produced by `Display`.
    #[must_use]
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 32 {
            return None;
        }
        u128::from_str_radix(s, 16).ok().map(Self)
    }

    /// First byte as two hex digits, used to fan out directory stores.
    #[must_use]
    pub fn shard(&self) -> String {
        format!("{:02x}", (self.0 >> 120) as u8)
    }
}

impl fmt::Display for CacheHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}
