use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::RdbError;

/// Opaque content version reported by the remote store for a file or ref.
///
/// Remote stores identify blob and commit versions with hex digests (git
/// uses SHA-1, the in-memory store uses BLAKE3). RepoDB never interprets the
/// digest; it only compares hashes and hands them back as write
/// preconditions.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Wrap a hex digest, lowercasing it.
    pub fn new(digest: impl Into<String>) -> Result<Self, RdbError> {
        let digest = digest.into();
        if digest.is_empty() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(RdbError::Validation(format!(
                "content hash must be a non-empty hex digest, got {digest:?}"
            )));
        }
        Ok(Self(digest.to_ascii_lowercase()))
    }

    /// Hex-encode raw digest bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    /// The full hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short representation (first 8 characters).
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = RdbError;

    fn try_from(digest: String) -> Result<Self, Self::Error> {
        Self::new(digest)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_hex_and_lowercases() {
        let hash = ContentHash::new("ABCdef0123").unwrap();
        assert_eq!(hash.as_str(), "abcdef0123");
    }

    #[test]
    fn from_bytes_hex_encodes() {
        let hash = ContentHash::from_bytes(&[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(hash.as_str(), "deadbeef");
    }

    #[test]
    fn rejects_empty_and_non_hex() {
        assert!(ContentHash::new("").is_err());
        assert!(ContentHash::new("not-a-hash").is_err());
    }

    #[test]
    fn short_is_at_most_8_chars() {
        let long = ContentHash::new("0123456789abcdef").unwrap();
        assert_eq!(long.short(), "01234567");
        let tiny = ContentHash::new("abc").unwrap();
        assert_eq!(tiny.short(), "abc");
    }

    #[test]
    fn serializes_as_plain_string() {
        let hash = ContentHash::new("deadbeef").unwrap();
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, "\"deadbeef\"");
    }

    #[test]
    fn deserialize_validates_digest() {
        let hash: ContentHash = serde_json::from_str("\"DEADBEEF\"").unwrap();
        assert_eq!(hash.as_str(), "deadbeef");

        assert!(serde_json::from_str::<ContentHash>("\"aéééé\"").is_err());
        assert!(serde_json::from_str::<ContentHash>("\"\"").is_err());
    }
}
