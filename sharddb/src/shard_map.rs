//! The shard map: a fixed `shardId → ShardInstance` mapping
//! built once from configuration, immutable thereafter, mirroring the
//! teacher's `backend::pool::Cluster` (a `shardId → Shard` map built once
//! at startup, shared via `Arc` rather than rebuilt per request).

use std::collections::BTreeMap;
use std::sync::Arc;

use sharddb_config::{Config, Role};
use tracing::info;

use crate::backend::{ConnectionFactory, ConnectionManager};
use crate::Error;

/// One shard's read and write connection managers, with the shard id
/// that identifies it in the map.
pub struct ShardInstance {
    shard_id: u16,
    read: ConnectionManager,
    write: ConnectionManager,
}

impl ShardInstance {
    pub fn shard_id(&self) -> u16 {
        self.shard_id
    }

    /// Read handle — may point at a replica.
    pub fn read(&self) -> &ConnectionManager {
        &self.read
    }

    /// Write handle — always points at the primary.
    pub fn write(&self) -> &ConnectionManager {
        &self.write
    }
}

struct ShardMapInner {
    shard_set_name: String,
    default_shard_id: u16,
    shards: BTreeMap<u16, ShardInstance>,
}

/// A shard set's fixed shard map, shared freely once built.
#[derive(Clone)]
pub struct ShardMap {
    inner: Arc<ShardMapInner>,
}

impl ShardMap {
    /// Build the map for `shard_set_name`, resolving every shard's
    /// read/write connection through the four-tier precedence merge
    /// exactly once.
    pub fn build(
        config: &Config,
        shard_set_name: &str,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Result<Self, Error> {
        let shard_set = config
            .shard_set(shard_set_name)
            .ok_or_else(|| Error::Config(sharddb_config::Error::UnknownShardSet(shard_set_name.to_owned())))?;

        let mut shards = BTreeMap::new();
        for shard in &shard_set.shards {
            let read = config.resolve(shard_set_name, Role::Read, shard.shard_id)?;
            let write = config.resolve(shard_set_name, Role::Write, shard.shard_id)?;

            shards.insert(
                shard.shard_id,
                ShardInstance {
                    shard_id: shard.shard_id,
                    read: ConnectionManager::new(read, factory.clone()),
                    write: ConnectionManager::new(write, factory.clone()),
                },
            );
        }

        info!(
            shard_set = shard_set_name,
            shards = shards.len(),
            "built shard map"
        );

        Ok(Self {
            inner: Arc::new(ShardMapInner {
                shard_set_name: shard_set_name.to_owned(),
                default_shard_id: shard_set.default_shard_id,
                shards,
            }),
        })
    }

    pub fn shard_set_name(&self) -> &str {
        &self.inner.shard_set_name
    }

    /// The shard an unsharded write targets.
    pub fn default_shard_id(&self) -> u16 {
        self.inner.default_shard_id
    }

    pub fn get(&self, shard_id: u16) -> Option<&ShardInstance> {
        self.inner.shards.get(&shard_id)
    }

    pub fn shard_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.inner.shards.keys().copied()
    }

    pub fn shards(&self) -> impl Iterator<Item = &ShardInstance> {
        self.inner.shards.values()
    }

    pub fn len(&self) -> usize {
        self.inner.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.shards.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::driver::{Connection, DriverError, Query, RawOutcome};
    use async_trait::async_trait;

    struct NullConnection;

    #[async_trait]
    impl Connection for NullConnection {
        async fn execute(&mut self, _query: &Query, _params: &crate::Params) -> Result<RawOutcome, DriverError> {
            Ok(RawOutcome::default())
        }
    }

    struct NullFactory;

    #[async_trait]
    impl ConnectionFactory for NullFactory {
        async fn connect(
            &self,
            _resolved: &sharddb_config::ResolvedConnection,
        ) -> Result<Box<dyn Connection>, DriverError> {
            Ok(Box::new(NullConnection))
        }
    }

    fn config() -> Config {
        let toml_source = r#"
[[shard_sets]]
shard_set_name = "customers"
default_shard_id = 0

[shard_sets.defaults]
database = "customers"

[[shard_sets.shards]]
shard_id = 0

[shard_sets.shards.read_connection]
server = "replica-0"

[shard_sets.shards.write_connection]
server = "primary-0"

[[shard_sets.shards]]
shard_id = 1

[shard_sets.shards.read_connection]
server = "replica-1"

[shard_sets.shards.write_connection]
server = "primary-1"
"#;
        toml::from_str(toml_source).unwrap()
    }

    #[test]
    fn builds_one_instance_per_configured_shard() {
        let map = ShardMap::build(&config(), "customers", Arc::new(NullFactory)).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.default_shard_id(), 0);
        assert!(map.get(0).is_some());
        assert!(map.get(1).is_some());
        assert!(map.get(2).is_none());
    }

    #[test]
    fn unknown_shard_set_is_reported() {
        let err = ShardMap::build(&config(), "nope", Arc::new(NullFactory)).unwrap_err();
        assert!(matches!(err, Error::Config(sharddb_config::Error::UnknownShardSet(_))));
    }
}
