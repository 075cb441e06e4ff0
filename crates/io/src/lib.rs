// File I/O operations

pub mod atomic;
pub mod csv;
pub mod json;
pub mod xml;

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `bytes`. Used to fingerprint configs and outputs.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
