use serde::{Deserialize, Serialize};

use crate::connection::DbConnection;
use crate::error::Error;
use crate::general::General;
use crate::shard_set::ShardSetConfig;

/// Which half of a shard's traffic a resolved connection serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Read,
    Write,
}

/// A fully merged connection: every field the driver needs to open a
/// connection and every resilience knob the connection manager needs,
/// with no tier left unresolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConnection {
    pub shard_set_name: String,
    pub shard_id: u16,
    pub role: Role,
    pub server: String,
    pub database: String,
    pub security_key: Option<String>,
    pub data_resilience_key: Option<String>,
    pub connect_timeout_ms: u64,
    pub command_timeout_ms: u64,
    pub pool_size: usize,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_reset_ms: u64,
}

/// Merge the four precedence tiers — global, shard-set, read/write role,
/// shard — into one [`ResolvedConnection`] for `(shard_set, shard_id, role)`.
///
/// Resolution happens once, at shard-map construction time: the result is
/// cached on the shard instance rather than re-merged on every call.
pub fn resolve(
    general: &General,
    shard_set: &ShardSetConfig,
    role: Role,
    shard_id: u16,
) -> Result<ResolvedConnection, Error> {
    let shard = shard_set
        .shard(shard_id)
        .ok_or_else(|| Error::UnknownShard {
            shard_set: shard_set.shard_set_name.clone(),
            shard_id,
        })?;

    let role_defaults = match role {
        Role::Read => &shard_set.read,
        Role::Write => &shard_set.write,
    };
    let shard_override = match role {
        Role::Read => &shard.read_connection,
        Role::Write => &shard.write_connection,
    };

    let merged = shard_override
        .layer_over(role_defaults)
        .layer_over(&shard_set.defaults)
        .layer_over(&global_fragment(general));

    let server = merged.server.ok_or_else(|| Error::MissingField {
        shard_set: shard_set.shard_set_name.clone(),
        shard_id,
        field: "server",
    })?;
    let database = merged.database.ok_or_else(|| Error::MissingField {
        shard_set: shard_set.shard_set_name.clone(),
        shard_id,
        field: "database",
    })?;

    Ok(ResolvedConnection {
        shard_set_name: shard_set.shard_set_name.clone(),
        shard_id,
        role,
        server,
        database,
        security_key: merged.security_key,
        data_resilience_key: merged.data_resilience_key,
        connect_timeout_ms: merged.connect_timeout_ms.unwrap_or(general.connect_timeout_ms),
        command_timeout_ms: merged.command_timeout_ms.unwrap_or(general.command_timeout_ms),
        pool_size: merged.pool_size.unwrap_or(general.pool_size),
        retry_attempts: merged.retry_attempts.unwrap_or(general.retry_attempts),
        retry_backoff_ms: merged.retry_backoff_ms.unwrap_or(general.retry_backoff_ms),
        circuit_breaker_threshold: merged
            .circuit_breaker_threshold
            .unwrap_or(general.circuit_breaker_threshold),
        circuit_breaker_reset_ms: merged
            .circuit_breaker_reset_ms
            .unwrap_or(general.circuit_breaker_reset_ms),
    })
}

fn global_fragment(general: &General) -> DbConnection {
    DbConnection {
        security_key: None,
        data_resilience_key: None,
        server: None,
        database: None,
        connect_timeout_ms: Some(general.connect_timeout_ms),
        command_timeout_ms: Some(general.command_timeout_ms),
        pool_size: Some(general.pool_size),
        retry_attempts: Some(general.retry_attempts),
        retry_backoff_ms: Some(general.retry_backoff_ms),
        circuit_breaker_threshold: Some(general.circuit_breaker_threshold),
        circuit_breaker_reset_ms: Some(general.circuit_breaker_reset_ms),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::shard_set::ShardEntry;

    fn shard_set() -> ShardSetConfig {
        ShardSetConfig {
            shard_set_name: "customers".into(),
            default_shard_id: 0,
            defaults: DbConnection {
                database: Some("customers".into()),
                ..Default::default()
            },
            read: DbConnection::default(),
            write: DbConnection {
                pool_size: Some(4),
                ..Default::default()
            },
            shards: vec![ShardEntry {
                shard_id: 0,
                read_connection: DbConnection {
                    server: Some("replica-0".into()),
                    ..Default::default()
                },
                write_connection: DbConnection {
                    server: Some("primary-0".into()),
                    ..Default::default()
                },
            }],
        }
    }

    #[test]
    fn merges_all_four_tiers() {
        let general = General::default();
        let set = shard_set();

        let write = resolve(&general, &set, Role::Write, 0).unwrap();
        assert_eq!(write.server, "primary-0");
        assert_eq!(write.database, "customers");
        assert_eq!(write.pool_size, 4);
        assert_eq!(write.connect_timeout_ms, general.connect_timeout_ms);

        let read = resolve(&general, &set, Role::Read, 0).unwrap();
        assert_eq!(read.server, "replica-0");
        assert_eq!(read.pool_size, general.pool_size);
    }

    #[test]
    fn unknown_shard_is_reported() {
        let general = General::default();
        let set = shard_set();
        let err = resolve(&general, &set, Role::Read, 9).unwrap_err();
        assert!(matches!(err, Error::UnknownShard { .. }));
    }

    #[test]
    fn missing_server_is_reported() {
        let general = General::default();
        let mut set = shard_set();
        set.shards[0].read_connection.server = None;
        set.shards[0].write_connection.server = None;
        let err = resolve(&general, &set, Role::Read, 0).unwrap_err();
        assert!(matches!(err, Error::MissingField { field: "server", .. }));
    }
}
