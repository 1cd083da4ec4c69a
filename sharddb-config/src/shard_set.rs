use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::connection::DbConnection;

/// One logical dataset's shard set: a name, the shard a write targets when
/// the caller supplies no [`sharddb_types`]-level shard key, the per-role
/// defaults every shard in the set inherits, and the shards themselves.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ShardSetConfig {
    pub shard_set_name: String,

    /// Shard targeted by writes that carry no explicit shard id.
    pub default_shard_id: u16,

    /// Fragment every shard and role in this set inherits before role- or
    /// shard-specific overrides are applied.
    #[serde(default)]
    pub defaults: DbConnection,

    /// Defaults for read connections across every shard in this set.
    #[serde(default)]
    pub read: DbConnection,

    /// Defaults for write connections across every shard in this set.
    #[serde(default)]
    pub write: DbConnection,

    pub shards: Vec<ShardEntry>,
}

/// A single physical shard within a [`ShardSetConfig`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ShardEntry {
    pub shard_id: u16,

    #[serde(default)]
    pub read_connection: DbConnection,

    #[serde(default)]
    pub write_connection: DbConnection,
}

impl ShardSetConfig {
    pub fn shard(&self, shard_id: u16) -> Option<&ShardEntry> {
        self.shards.iter().find(|s| s.shard_id == shard_id)
    }
}
