use sha2::{Digest, Sha256};

/// Largest id handed out, `2^63 - 1`. Ids stay in signed 64-bit range.
pub const MAX_POINT_ID: u64 = (1u64 << 63) - 1;

/// Maps an external product key to a stable point id.
///
/// The first 8 bytes of the SHA-256 digest (big-endian) reduced modulo
/// `2^63 - 1`. Same key always yields the same id, which is what makes
/// re-ingestion an overwrite instead of a duplicate.
pub fn stable_id(key: &str) -> u64 {
    let digest = Sha256::digest(key.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head) % MAX_POINT_ID
}
