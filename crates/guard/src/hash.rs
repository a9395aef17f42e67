use std::fmt::Write;

use sha2::{Digest, Sha256};

/// Lowercase-hex SHA-256. Content hashes are always computed over the
/// pre-normalization bytes, so identical inputs hash identically no
/// matter what the pipeline later does to the text.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(&mut out, "{byte:02x}");
    }
    out
}
