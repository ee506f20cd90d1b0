use sha2::{Digest, Sha256};

/// Compute the content signature of raw workbook bytes.
///
/// Only used to tell whether a reload saw different bytes than the last one.
pub fn compute_signature(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    format!("{:x}", result)
}
