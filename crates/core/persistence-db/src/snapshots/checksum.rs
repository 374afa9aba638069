//! Snapshot integrity checksum new-type.

use sha2::{Digest, Sha256};
use sqlx::{Database, Postgres, encode::IsNull, error::BoxDynError};

/// A lowercase hex SHA-256 checksum over a snapshot state blob.
///
/// The invariant `sha256(state) == checksum` holds for every stored snapshot
/// row; [`Checksum::of`] is the only way to produce one from bytes, and
/// parsing normalizes case so equality is well defined.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum(String);

impl Checksum {
    /// Number of hex characters in a SHA-256 checksum.
    const HEX_LEN: usize = 64;

    /// Computes the checksum of a state blob.
    pub fn of(state: &[u8]) -> Self {
        let digest = Sha256::digest(state);
        Self(hex::encode(digest))
    }

    /// The checksum as a lowercase hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Checksum {
    type Err = ChecksumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != Self::HEX_LEN {
            return Err(ChecksumParseError::InvalidLength(s.len()));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ChecksumParseError::InvalidCharacter);
        }
        Ok(Self(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl sqlx::Type<Postgres> for Checksum {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<Postgres>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, Postgres> for Checksum {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let raw = <String as sqlx::Decode<Postgres>>::decode(value)?;
        raw.parse().map_err(|err| Box::new(err) as BoxDynError)
    }
}

impl<'q> sqlx::Encode<'q, Postgres> for Checksum {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, BoxDynError> {
        <String as sqlx::Encode<'q, Postgres>>::encode_by_ref(&self.0, buf)
    }
}

impl serde::Serialize for Checksum {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Checksum {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Error parsing a [`Checksum`] from a string.
#[derive(Debug, thiserror::Error)]
pub enum ChecksumParseError {
    /// The string is not 64 characters long.
    #[error("checksum must be 64 hex characters, got {0}")]
    InvalidLength(usize),

    /// The string contains a non-hex character.
    #[error("checksum contains a non-hex character")]
    InvalidCharacter,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_lowercase_hex_sha256() {
        let checksum = Checksum::of(b"hello world");
        assert_eq!(
            checksum.as_str(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn parse_normalizes_case() {
        let upper = "B94D27B9934D3E08A52E52D7DA7DABFAC484EFE37A5380EE9088F7ACE2EFCDE9";
        let parsed: Checksum = upper.parse().expect("should parse");
        assert_eq!(parsed, Checksum::of(b"hello world"));
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!("abc".parse::<Checksum>().is_err());
        let non_hex = "z".repeat(64);
        assert!(non_hex.parse::<Checksum>().is_err());
    }
}
