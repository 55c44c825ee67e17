//! Integrity digests for persisted certificate artifacts.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of the given bytes
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(data.as_ref()))
}

/// Check `data` against an expected hex digest (case-insensitive)
pub fn matches_sha256(data: impl AsRef<[u8]>, expected: &str) -> bool {
    sha256_hex(data).eq_ignore_ascii_case(expected)
}
