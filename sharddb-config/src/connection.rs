use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A fragment of connection settings.
///
/// Every field is optional because a `DbConnection` is also used as an
/// override fragment at the shard-set, read/write role, and shard tiers
/// of the precedence chain (see [`crate::precedence`]); only the fully
/// merged [`crate::ResolvedConnection`] requires every field to be
/// present.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DbConnection {
    /// Reference to a credential, resolved by the application outside this
    /// crate (this crate never stores or transmits a secret itself).
    pub security_key: Option<String>,

    /// Reference to a named resilience policy (retry/circuit-breaker
    /// tuning); when absent, the fields on this fragment (or an ancestor
    /// tier's) are used instead.
    pub data_resilience_key: Option<String>,

    /// Host or DNS name of the database server.
    pub server: Option<String>,

    /// Name of the database on the server.
    pub database: Option<String>,

    /// Overrides [`crate::General::connect_timeout_ms`].
    pub connect_timeout_ms: Option<u64>,

    /// Overrides [`crate::General::command_timeout_ms`].
    pub command_timeout_ms: Option<u64>,

    /// Overrides [`crate::General::pool_size`].
    pub pool_size: Option<usize>,

    /// Overrides [`crate::General::retry_attempts`].
    pub retry_attempts: Option<u32>,

    /// Overrides [`crate::General::retry_backoff_ms`].
    pub retry_backoff_ms: Option<u64>,

    /// Overrides [`crate::General::circuit_breaker_threshold`].
    pub circuit_breaker_threshold: Option<u32>,

    /// Overrides [`crate::General::circuit_breaker_reset_ms`].
    pub circuit_breaker_reset_ms: Option<u64>,
}

impl DbConnection {
    /// Layer `self` over `base`: any field `self` sets wins, otherwise
    /// `base`'s value (which may itself be absent) is kept.
    pub(crate) fn layer_over(&self, base: &DbConnection) -> DbConnection {
        DbConnection {
            security_key: self.security_key.clone().or_else(|| base.security_key.clone()),
            data_resilience_key: self
                .data_resilience_key
                .clone()
                .or_else(|| base.data_resilience_key.clone()),
            server: self.server.clone().or_else(|| base.server.clone()),
            database: self.database.clone().or_else(|| base.database.clone()),
            connect_timeout_ms: self.connect_timeout_ms.or(base.connect_timeout_ms),
            command_timeout_ms: self.command_timeout_ms.or(base.command_timeout_ms),
            pool_size: self.pool_size.or(base.pool_size),
            retry_attempts: self.retry_attempts.or(base.retry_attempts),
            retry_backoff_ms: self.retry_backoff_ms.or(base.retry_backoff_ms),
            circuit_breaker_threshold: self
                .circuit_breaker_threshold
                .or(base.circuit_breaker_threshold),
            circuit_breaker_reset_ms: self
                .circuit_breaker_reset_ms
                .or(base.circuit_breaker_reset_ms),
        }
    }
}

/// An entry in the root-level `db_connections` list: a named connection
/// fragment other tiers can layer on top of.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DbConnectionEntry {
    pub db_connection_id: u32,
    pub db_connection: DbConnection,
}
