//! SHA-256 content hashes for optimistic writes.
//!
//! A reader gets the hash of what it saw; a checked write only succeeds if the
//! file still hashes to that value when the mutation permit is held.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a file's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn from_content(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against a caller-supplied hex string, ignoring case.
    pub fn matches(&self, expected: &str) -> bool {
        self.0.eq_ignore_ascii_case(expected.trim())
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
