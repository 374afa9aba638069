//! Binary payload encoding at the JSON boundary.
//!
//! The normative encoding is standard padded base64. Legacy clients sent
//! integer arrays on ingest paths; those are still accepted on input but
//! never produced on output.

use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize, de};

/// A binary blob carried as base64 in JSON.
///
/// Serializes to a standard padded base64 string. Deserializes from either a
/// base64 string or a legacy array of byte integers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Bytes(pub Vec<u8>);

impl Base64Bytes {
    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Base64Bytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Serialize for Base64Bytes {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&general_purpose::STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Base64Bytes {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct Visitor;

        impl<'de> de::Visitor<'de> for Visitor {
            type Value = Base64Bytes;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a base64 string or an array of byte values")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                general_purpose::STANDARD
                    .decode(value)
                    .map(Base64Bytes)
                    .map_err(|err| E::custom(format!("invalid base64: {err}")))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(value) = seq.next_element::<u8>()? {
                    bytes.push(value);
                }
                Ok(Base64Bytes(bytes))
            }
        }

        deserializer.deserialize_any(Visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_padded_base64() {
        let json = serde_json::to_string(&Base64Bytes(vec![1, 2, 3, 4])).unwrap();
        assert_eq!(json, "\"AQIDBA==\"");
    }

    #[test]
    fn deserializes_base64_string() {
        let bytes: Base64Bytes = serde_json::from_str("\"AQIDBA==\"").unwrap();
        assert_eq!(bytes.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn deserializes_legacy_integer_array() {
        let bytes: Base64Bytes = serde_json::from_str("[1, 2, 3, 4]").unwrap();
        assert_eq!(bytes.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn rejects_invalid_base64_and_out_of_range_ints() {
        assert!(serde_json::from_str::<Base64Bytes>("\"not@base64!\"").is_err());
        assert!(serde_json::from_str::<Base64Bytes>("[1, 256]").is_err());
    }
}
