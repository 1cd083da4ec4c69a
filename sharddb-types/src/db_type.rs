use serde::{Deserialize, Serialize};

/// Database type descriptor attached to a scalar [`crate::Value`] binding.
///
/// A [`MapAttribute`] names one of these for each scalar field so the
/// mapper cache knows how to encode/decode the value regardless of which
/// driver eventually sends it over the wire. Driver crates translate
/// `DbType` into their own wire type; this crate never does.
///
/// [`MapAttribute`]: https://docs.rs/sharddb (see `sharddb::mapping::MapAttribute`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DbType {
    Boolean,
    SmallInt,
    Int,
    BigInt,
    Real,
    Double,
    Decimal,
    Text,
    Uuid,
    Timestamp,
    TimestampTz,
    Binary,
}

impl DbType {
    /// Name used in error messages and generated code.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::SmallInt => "smallint",
            Self::Int => "int",
            Self::BigInt => "bigint",
            Self::Real => "real",
            Self::Double => "double",
            Self::Decimal => "decimal",
            Self::Text => "text",
            Self::Uuid => "uuid",
            Self::Timestamp => "timestamp",
            Self::TimestampTz => "timestamptz",
            Self::Binary => "binary",
        }
    }
}

impl std::fmt::Display for DbType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
