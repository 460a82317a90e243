//! Content identity hashing
//!
//! Every stored blob is keyed by its [`IdHash`]: the lowercase hex SHA-256
//! of the content bytes. Identical bytes always land in the same slot.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Lowercase hexadecimal SHA-256 digest identifying a content blob
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdHash(String);

impl IdHash {
    /// Wraps an already-computed digest string.
    ///
    /// No validation is performed; use [`id_hash`] to derive one from bytes.
    pub fn new(s: impl Into<String>) -> Self {
        IdHash(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IdHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Computes the identity hash for the given content bytes.
pub fn id_hash(content: &[u8]) -> IdHash {
    let digest = Sha256::digest(content);
    IdHash(hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digests() {
        let cases = [
            (
                "This is just a random string.",
                "94c22bf841b30ff895f075c8c8b8625539ef6f2ef2fd7ae196251d08e9db2a38",
            ),
            (
                "aaaa",
                "61be55a8e2f6b4e172338bddf184d6dbee29c98853e0a0485ecee7f27b9af0b4",
            ),
            (
                "bbbb",
                "81cc5b17018674b401b42f35ba07bb79e211239c23bffe658da1577e3e646877",
            ),
        ];
        for (input, want) in cases {
            assert_eq!(id_hash(input.as_bytes()).as_str(), want);
        }
    }

    #[test]
    fn test_identical_bytes_identical_hash() {
        assert_eq!(id_hash(b"content"), id_hash(b"content"));
    }

    #[test]
    fn test_distinct_bytes_distinct_hash() {
        assert_ne!(id_hash(b"aaaa"), id_hash(b"aaab"));
    }

    #[test]
    fn test_display_matches_inner() {
        let h = id_hash(b"aaaa");
        assert_eq!(h.to_string(), h.as_str());
    }
}
