//! Errors raised by the mapper cache, the connection manager, and the
//! shard-set fan-out engine.

use thiserror::Error;

/// Errors raised by this crate.
///
/// Configuration/mapping errors (`InvalidMapping` through `CyclicModel`)
/// are programmer errors: they surface the first time a type is used and
/// are never retried. `Transient` wraps whatever the driver raised after
/// the resilience policy's retry ceiling was exhausted. `Cancelled`
/// propagates a cancellation unchanged. `EmptyResult` is deliberately not
/// a variant here — it is a `tracing::debug!` event, not a thrown error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid mapping for {type_name}: {reason}")]
    InvalidMapping {
        type_name: &'static str,
        reason: String,
    },

    #[error("composite key on {type_name} is missing required role {role:?}")]
    MissingKeyRole {
        type_name: &'static str,
        role: sharddb_types::KeyRole,
    },

    #[error("no #[map(...)] attributes found on {0}; did you forget to annotate the model?")]
    NoMappingAttributesFound(&'static str),

    #[error("expected at most one row for {type_name} from procedure \"{procedure}\", got {count}")]
    UnexpectedMultiRow {
        type_name: &'static str,
        procedure: String,
        count: usize,
    },

    #[error("nested model binding cycle detected while building a mapper for {0}")]
    CyclicModel(&'static str),

    #[error("operation was cancelled")]
    OperationCancelled,

    #[error("value conversion: {0}")]
    Value(#[from] sharddb_types::Error),

    #[error("configuration: {0}")]
    Config(#[from] sharddb_config::Error),

    #[error("resilience policy exhausted its retry ceiling: {0}")]
    Transient(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("circuit breaker is open for {0}")]
    CircuitOpen(String),

    #[error("unknown shard id {0}")]
    UnknownShard(u16),
}

impl Error {
    /// True for errors `ReadFirst` treats as benign: a sibling that was
    /// cancelled, or a circuit that was already open before the race
    /// started. Every other error is a hard failure that aborts the
    /// fan-out immediately.
    pub fn is_benign_for_read_first(&self) -> bool {
        matches!(self, Error::OperationCancelled | Error::CircuitOpen(_))
    }
}
