//! Update ID new-type with validation for update record identifiers.

use sqlx::{Database, Postgres, encode::IsNull, error::BoxDynError};

/// A type-safe identifier for update log records.
///
/// [`UpdateId`] is a new-type wrapper around `i64` that enforces that values
/// are always positive, matching the `BIGSERIAL` column they come from. Ids
/// are assigned by the database in insert order and are strictly increasing,
/// which is what makes them usable as the tie-breaker in the
/// `(timestamp, id)` ordering and as the compaction cut bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UpdateId(i64);

impl TryFrom<i64> for UpdateId {
    type Error = UpdateIdI64ConvError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value <= 0 {
            Err(UpdateIdI64ConvError::NonPositive(value))
        } else {
            Ok(Self(value))
        }
    }
}

impl std::ops::Deref for UpdateId {
    type Target = i64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::str::FromStr for UpdateId {
    type Err = UpdateIdFromStrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s.parse::<i64>().map_err(UpdateIdFromStrError::ParseError)?;
        id.try_into().map_err(UpdateIdFromStrError::NonPositive)
    }
}

impl std::fmt::Display for UpdateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl sqlx::Type<Postgres> for UpdateId {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <i64 as sqlx::Type<Postgres>>::type_info()
    }
}

impl sqlx::postgres::PgHasArrayType for UpdateId {
    fn array_type_info() -> sqlx::postgres::PgTypeInfo {
        <i64 as sqlx::postgres::PgHasArrayType>::array_type_info()
    }
}

impl<'r> sqlx::Decode<'r, Postgres> for UpdateId {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let id = <i64 as sqlx::Decode<Postgres>>::decode(value)?;
        id.try_into().map_err(|err| Box::new(err) as BoxDynError)
    }
}

impl<'q> sqlx::Encode<'q, Postgres> for UpdateId {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, BoxDynError> {
        <i64 as sqlx::Encode<'q, Postgres>>::encode_by_ref(&self.0, buf)
    }
}

impl serde::Serialize for UpdateId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

/// Error converting an `i64` into an [`UpdateId`].
#[derive(Debug, thiserror::Error)]
pub enum UpdateIdI64ConvError {
    /// The value is zero or negative.
    #[error("update id must be positive, got: {0}")]
    NonPositive(i64),
}

/// Error parsing an [`UpdateId`] from a string.
#[derive(Debug, thiserror::Error)]
pub enum UpdateIdFromStrError {
    /// The string is not a valid `i64`.
    #[error("invalid update id: {0}")]
    ParseError(#[source] std::num::ParseIntError),

    /// The parsed value is zero or negative.
    #[error(transparent)]
    NonPositive(UpdateIdI64ConvError),
}
