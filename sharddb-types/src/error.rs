//! Value conversion errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("value is null")]
    UnexpectedNull,

    #[error("value type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("malformed shard key: {0}")]
    MalformedKey(String),

    #[error("invalid mapping for {type_name}: {reason}")]
    InvalidMapping {
        type_name: &'static str,
        reason: String,
    },
}
