use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Global defaults applied to every connection unless overridden by a
/// shard set, a read/write role, or a specific shard.
///
/// Precedence (lowest to highest): `General` → [`crate::ShardSetConfig::defaults`]
/// → [`crate::ShardSetConfig::read`]/[`crate::ShardSetConfig::write`] →
/// [`crate::ShardEntry::read_connection`]/[`crate::ShardEntry::write_connection`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct General {
    /// How long to wait for a new connection to open before giving up.
    ///
    /// _Default:_ `5000`
    #[serde(default = "General::connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// How long to wait for a command to complete before treating it as
    /// transient and handing it to the resilience policy.
    ///
    /// _Default:_ `30000`
    #[serde(default = "General::command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Default number of pooled connections per shard instance.
    ///
    /// _Default:_ `10`
    #[serde(default = "General::pool_size")]
    pub pool_size: usize,

    /// Maximum number of retry attempts the resilience policy performs
    /// for a transient error before surfacing it to the caller.
    ///
    /// _Default:_ `3`
    #[serde(default = "General::retry_attempts")]
    pub retry_attempts: u32,

    /// Base delay for the resilience policy's exponential backoff between
    /// retry attempts.
    ///
    /// _Default:_ `50`
    #[serde(default = "General::retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Number of consecutive failures that open the circuit breaker for a
    /// logical endpoint (a shard's read or write role).
    ///
    /// _Default:_ `5`
    #[serde(default = "General::circuit_breaker_threshold")]
    pub circuit_breaker_threshold: u32,

    /// How long a tripped circuit breaker stays open before allowing a
    /// trial request through.
    ///
    /// _Default:_ `30000`
    #[serde(default = "General::circuit_breaker_reset_ms")]
    pub circuit_breaker_reset_ms: u64,
}

impl General {
    fn connect_timeout_ms() -> u64 {
        5_000
    }

    fn command_timeout_ms() -> u64 {
        30_000
    }

    fn pool_size() -> usize {
        10
    }

    fn retry_attempts() -> u32 {
        3
    }

    fn retry_backoff_ms() -> u64 {
        50
    }

    fn circuit_breaker_threshold() -> u32 {
        5
    }

    fn circuit_breaker_reset_ms() -> u64 {
        30_000
    }
}

impl Default for General {
    fn default() -> Self {
        Self {
            connect_timeout_ms: Self::connect_timeout_ms(),
            command_timeout_ms: Self::command_timeout_ms(),
            pool_size: Self::pool_size(),
            retry_attempts: Self::retry_attempts(),
            retry_backoff_ms: Self::retry_backoff_ms(),
            circuit_breaker_threshold: Self::circuit_breaker_threshold(),
            circuit_breaker_reset_ms: Self::circuit_breaker_reset_ms(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_toml_serializable() {
        let general = General::default();
        let text = toml::to_string(&general).unwrap();
        let back: General = toml::from_str(&text).unwrap();
        assert_eq!(general, back);
    }
}
