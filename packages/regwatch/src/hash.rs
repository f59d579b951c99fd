//! Content digests over normalized text.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of a hex-encoded SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// SHA-256 of a normalized text, lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Digest the UTF-8 bytes of `text`. Nothing else enters the hash.
    pub fn of(text: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Wrap a stored hex digest.
    pub fn from_hex(hex: impl Into<String>) -> Option<Self> {
        let hex = hex.into();
        let valid = hex.len() == DIGEST_HEX_LEN
            && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        valid.then_some(Self(hex))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for logs.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(value).ok_or_else(|| "expected 64 lowercase hex characters".to_string())
    }
}

impl From<ContentDigest> for String {
    fn from(digest: ContentDigest) -> Self {
        digest.0
    }
}

impl PartialEq<str> for ContentDigest {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Convenience for [`ContentDigest::of`].
pub fn digest(text: &str) -> ContentDigest {
    ContentDigest::of(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_vector() {
        assert_eq!(
            digest("").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_from_hex_validates() {
        let d = digest("Rate: 10.00");
        assert_eq!(ContentDigest::from_hex(d.as_str()), Some(d.clone()));
        assert_eq!(ContentDigest::from_hex("abc"), None);
        assert_eq!(ContentDigest::from_hex(d.as_str().to_uppercase()), None);
    }

    #[test]
    fn test_deserialize_rejects_malformed_digest() {
        let d = digest("Rate: 10.00");
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"{}\"", d.as_str()));

        let back: ContentDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.short(), &d.as_str()[..12]);

        assert!(serde_json::from_str::<ContentDigest>("\"abc\"").is_err());
    }

    proptest! {
        #[test]
        fn digest_is_pure(text in ".*") {
            let a = digest(&text);
            let b = digest(&text.clone());
            prop_assert_eq!(a.as_str().len(), DIGEST_HEX_LEN);
            prop_assert_eq!(a, b);
        }

        #[test]
        fn different_text_different_digest(a in ".{0,64}", b in ".{0,64}") {
            prop_assume!(a != b);
            prop_assert_ne!(digest(&a), digest(&b));
        }
    }
}
