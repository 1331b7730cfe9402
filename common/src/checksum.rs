//! SHA-256 hex digests and the expected-vs-actual comparison used by the
//! firmware upload gate.

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChecksumError {
    #[error("no expected checksum supplied")]
    Missing,
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    Mismatch { expected: String, actual: String },
}

/// Lower-case hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Incremental SHA-256 for bodies that arrive in chunks.
#[derive(Default)]
pub struct StreamingDigest {
    hasher: Sha256,
    len: u64,
}

impl StreamingDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.len += chunk.len() as u64;
    }

    /// Bytes hashed so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn finalize_hex(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

/// Compare an expected hex digest with the computed one.
///
/// The comparison is a case-sensitive string equality; a blank or absent
/// expectation is a rejection, not a pass.
pub fn verify(expected: Option<&str>, actual: &str) -> Result<(), ChecksumError> {
    let expected = expected
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or(ChecksumError::Missing)?;
    if expected != actual {
        return Err(ChecksumError::Mismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}
