use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{DbType, Error};

/// A driver-independent, tagged parameter/column value.
///
/// This is the "small vector of tagged values" a cloneable parameter
/// collection is built from ([`crate::DbType`] describes the wire type;
/// `Value` holds the actual payload). Cloning a `Value` never allocates
/// more than the payload itself requires: `Binary` holds a [`Bytes`],
/// whose clone is an atomic refcount bump, which keeps per-shard cloning
/// of a parameter collection cheap even when a bound field is a large
/// blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Real(f32),
    Double(f64),
    Decimal(Decimal),
    Text(String),
    Uuid(Uuid),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Binary(Bytes),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The [`DbType`] this value would be encoded as, if non-null.
    pub fn db_type(&self) -> Option<DbType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(DbType::Boolean),
            Value::SmallInt(_) => Some(DbType::SmallInt),
            Value::Int(_) => Some(DbType::Int),
            Value::BigInt(_) => Some(DbType::BigInt),
            Value::Real(_) => Some(DbType::Real),
            Value::Double(_) => Some(DbType::Double),
            Value::Decimal(_) => Some(DbType::Decimal),
            Value::Text(_) => Some(DbType::Text),
            Value::Uuid(_) => Some(DbType::Uuid),
            Value::Timestamp(_) => Some(DbType::Timestamp),
            Value::TimestampTz(_) => Some(DbType::TimestampTz),
            Value::Binary(_) => Some(DbType::Binary),
        }
    }
}

/// Convert a Rust value into a [`Value`] for writing to a parameter
/// collection or row.
pub trait ToValue {
    fn to_value(&self) -> Value;
}

/// Convert a [`Value`] read from a parameter collection or row back into
/// a Rust value.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, Error>;
}

macro_rules! scalar_conversion {
    ($ty:ty, $variant:ident, $name:literal) => {
        impl ToValue for $ty {
            fn to_value(&self) -> Value {
                Value::$variant(self.clone())
            }
        }

        impl FromValue for $ty {
            fn from_value(value: &Value) -> Result<Self, Error> {
                match value {
                    Value::$variant(v) => Ok(v.clone()),
                    Value::Null => Err(Error::UnexpectedNull),
                    _ => Err(Error::TypeMismatch {
                        expected: $name,
                        found: "other",
                    }),
                }
            }
        }
    };
}

scalar_conversion!(bool, Bool, "boolean");
scalar_conversion!(i16, SmallInt, "smallint");
scalar_conversion!(i32, Int, "int");
scalar_conversion!(i64, BigInt, "bigint");
scalar_conversion!(f32, Real, "real");
scalar_conversion!(f64, Double, "double");
scalar_conversion!(Decimal, Decimal, "decimal");
scalar_conversion!(String, Text, "text");
scalar_conversion!(Uuid, Uuid, "uuid");
scalar_conversion!(NaiveDateTime, Timestamp, "timestamp");
scalar_conversion!(DateTime<Utc>, TimestampTz, "timestamptz");
scalar_conversion!(Bytes, Binary, "binary");

impl ToValue for &str {
    fn to_value(&self) -> Value {
        Value::Text((*self).to_owned())
    }
}

impl ToValue for Vec<u8> {
    fn to_value(&self) -> Value {
        Value::Binary(Bytes::from(self.clone()))
    }
}

impl<T: ToValue> ToValue for Option<T> {
    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, Error> {
        if value.is_null() {
            Ok(None)
        } else {
            Ok(Some(T::from_value(value)?))
        }
    }
}
