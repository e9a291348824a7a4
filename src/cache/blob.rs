//! Blob framing for persisted entries.
//!
//! ```text
//! offset  size  field
//! 0       4     magic  "MVSC"
//! 4       4     format version (LE)
//! 8       8     payload length (LE)
//! 16      8     xxh3-64 of the payload (LE)
//! 24      n     payload
//! ```
//!
//! Any mismatch rejects the blob as a whole; there is no partial recovery.

use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

pub const BLOB_MAGIC: [u8; 4] = *b"MVSC";
pub const BLOB_FORMAT_VERSION: u32 = 1;
pub const BLOB_HEADER_BYTES: usize = 24;

/// Why a stored blob was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlobError {
    #[error("blob is {0} bytes, shorter than its header")]
    Truncated(usize),
    #[error("bad magic {0:02x?}")]
    BadMagic([u8; 4]),
    #[error("format version {found} (expected {BLOB_FORMAT_VERSION})")]
    Version { found: u32 },
    #[error("payload length {declared} does not match the {actual} bytes present")]
    Length { declared: u64, actual: usize },
    #[error("checksum mismatch")]
    Checksum,
}

/// Frames `payload`.
#[must_use]
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(BLOB_HEADER_BYTES + payload.len());
    out.extend_from_slice(&BLOB_MAGIC);
    out.extend_from_slice(&BLOB_FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(&xxh3_64(payload).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Validates the framing and returns the payload.
pub fn decode(blob: &[u8]) -> Result<&[u8], BlobError> {
    if blob.len() < BLOB_HEADER_BYTES {
        return Err(BlobError::Truncated(blob.len()));
    }
    let (header, payload) = blob.split_at(BLOB_HEADER_BYTES);

    let magic: [u8; 4] = [header[0], header[1], header[2], header[3]];
    if magic != BLOB_MAGIC {
        return Err(BlobError::BadMagic(magic));
    }
    let found = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if found != BLOB_FORMAT_VERSION {
        return Err(BlobError::Version { found });
    }
    let declared = read_u64(&header[8..16]);
    if declared != payload.len() as u64 {
        return Err(BlobError::Length {
            declared,
            actual: payload.len(),
        });
    }
    if read_u64(&header[16..24]) != xxh3_64(payload) {
        return Err(BlobError::Checksum);
    }
    Ok(payload)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_returns_payload() {
        let blob = encode(b"hello");
        assert_eq!(blob.len(), BLOB_HEADER_BYTES + 5);
        assert_eq!(decode(&blob), Ok(&b"hello"[..]));
    }

    #[test]
    fn test_rejects_damage() {
        let blob = encode(b"payload");

        assert_eq!(decode(&blob[..10]), Err(BlobError::Truncated(10)));

        let mut bad = blob.clone();
        bad[0] = b'X';
        assert!(matches!(decode(&bad), Err(BlobError::BadMagic(_))));

        let mut bad = blob.clone();
        bad[4] = 9;
        assert_eq!(decode(&bad), Err(BlobError::Version { found: 9 }));

        let mut bad = blob.clone();
        bad.push(0);
        assert!(matches!(decode(&bad), Err(BlobError::Length { .. })));

        let mut bad = blob;
        let last = bad.len() - 1;
        bad[last] ^= 0xff;
        assert_eq!(decode(&bad), Err(BlobError::Checksum));
    }
}
