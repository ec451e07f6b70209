//! Idempotency and content-addressing identifiers.

use std::fmt;

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

static STABLE_EVENT_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^rec-\d{8}T\d{6}Z-[0-9a-f]{8}$").expect("stable event id pattern is valid")
});

static CHECKSUM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)sha256:[0-9a-f]{64}$").expect("checksum pattern is valid")
});

/// `rec-<ISO8601-compact-UTC>-<8 lowercase hex>`. The sole idempotency key for a drop.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StableEventId(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed stable event id: {0:?}")]
pub struct StableEventIdError(String);

impl StableEventId {
    pub fn new(value: impl Into<String>) -> Result<Self, StableEventIdError> {
        let value = value.into();
        if STABLE_EVENT_ID_RE.is_match(&value) {
            Ok(Self(value))
        } else {
            Err(StableEventIdError(value))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StableEventId {
    type Error = StableEventIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StableEventId> for String {
    fn from(value: StableEventId) -> Self {
        value.0
    }
}

impl fmt::Display for StableEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for StableEventId {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

/// `sha256:<64 lowercase hex>`. Always canonicalised to lowercase on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Checksum(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("malformed checksum: {0:?}")]
pub struct ChecksumFormatError(String);

impl Checksum {
    pub fn new(value: impl Into<String>) -> Result<Self, ChecksumFormatError> {
        let value = value.into();
        if !CHECKSUM_RE.is_match(&value) {
            return Err(ChecksumFormatError(value));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    /// Build a checksum value directly from a raw SHA-256 hex digest (no `sha256:` prefix).
    pub fn from_hex_digest(hex: impl AsRef<str>) -> Result<Self, ChecksumFormatError> {
        Self::new(format!("sha256:{}", hex.as_ref()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 64-character hex payload, without the `sha256:` scheme prefix.
    #[must_use]
    pub fn hex_digest(&self) -> &str {
        self.0.strip_prefix("sha256:").unwrap_or(&self.0)
    }

    /// True if `candidate` is a syntactically valid checksum string.
    #[must_use]
    pub fn is_well_formed(candidate: &str) -> bool {
        CHECKSUM_RE.is_match(candidate)
    }
}

impl TryFrom<String> for Checksum {
    type Error = ChecksumFormatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Checksum> for String {
    fn from(value: Checksum) -> Self {
        value.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_event_id_accepts_canonical_form() {
        let id = StableEventId::new("rec-20251003T091500Z-3f9c4241").unwrap();
        assert_eq!(id.as_str(), "rec-20251003T091500Z-3f9c4241");
    }

    #[test]
    fn stable_event_id_rejects_malformed() {
        assert!(StableEventId::new("rec-not-a-real-id").is_err());
    }

    #[test]
    fn checksum_canonicalises_to_lowercase() {
        let sum = Checksum::new(format!("sha256:{}", "AB".repeat(32))).unwrap();
        assert_eq!(sum.as_str(), format!("sha256:{}", "ab".repeat(32)));
    }

    #[test]
    fn checksum_rejects_wrong_length() {
        assert!(Checksum::new("sha256:deadbeef").is_err());
    }

    #[test]
    fn checksum_from_hex_digest_prefixes_scheme() {
        let sum = Checksum::from_hex_digest("0".repeat(64)).unwrap();
        assert_eq!(sum.hex_digest(), "0".repeat(64));
    }
}
