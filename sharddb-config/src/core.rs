use std::collections::HashSet;
use std::fs::read_to_string;
use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::connection::DbConnectionEntry;
use crate::error::Error;
use crate::general::General;
use crate::precedence::{self, ResolvedConnection, Role};
use crate::shard_set::ShardSetConfig;

/// Root configuration: global defaults, the flat pool of named connection
/// fragments, and the shard sets built from them.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub general: General,

    #[serde(default)]
    pub db_connections: Vec<DbConnectionEntry>,

    #[serde(default)]
    pub shard_sets: Vec<ShardSetConfig>,
}

impl Config {
    /// Load configuration from `path`, falling back to [`Config::default`]
    /// with a warning if the file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let config = match read_to_string(path) {
            Ok(text) => {
                let config: Config = toml::from_str(&text)?;
                info!("loaded \"{}\"", path.display());
                config
            }
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "\"{}\" doesn't exist, loading defaults instead",
                    path.display()
                );
                Config::default()
            }
            Err(source) => {
                return Err(Error::Io {
                    path: path.to_owned(),
                    source,
                });
            }
        };

        config.check()?;
        Ok(config)
    }

    /// Validate uniqueness constraints the precedence merge relies on.
    pub fn check(&self) -> Result<(), Error> {
        let mut seen_sets = HashSet::new();
        for set in &self.shard_sets {
            if !seen_sets.insert(set.shard_set_name.clone()) {
                return Err(Error::DuplicateShardSet(set.shard_set_name.clone()));
            }

            let mut seen_shards = HashSet::new();
            for shard in &set.shards {
                if !seen_shards.insert(shard.shard_id) {
                    return Err(Error::DuplicateShard {
                        shard_set: set.shard_set_name.clone(),
                        shard_id: shard.shard_id,
                    });
                }
            }
        }

        Ok(())
    }

    pub fn shard_set(&self, name: &str) -> Option<&ShardSetConfig> {
        self.shard_sets.iter().find(|s| s.shard_set_name == name)
    }

    /// Render this schema's shape as a JSON Schema document, for editor
    /// tooling.
    pub fn json_schema() -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(Config)).expect("schema_for! output is always valid JSON")
    }

    /// Resolve every precedence tier into a single flat connection for
    /// `shard_set_name`'s `shard_id`/`role`.
    pub fn resolve(
        &self,
        shard_set_name: &str,
        role: Role,
        shard_id: u16,
    ) -> Result<ResolvedConnection, Error> {
        let shard_set = self
            .shard_set(shard_set_name)
            .ok_or_else(|| Error::UnknownShardSet(shard_set_name.to_owned()))?;

        precedence::resolve(&self.general, shard_set, role, shard_id)
    }

    /// Resolve every `(role, shard_id)` combination for every shard set,
    /// as the shard map needs at construction time.
    pub fn resolve_all(&self) -> Result<Vec<ResolvedConnection>, Error> {
        let mut resolved = Vec::new();
        for set in &self.shard_sets {
            for shard in &set.shards {
                resolved.push(precedence::resolve(
                    &self.general,
                    set,
                    Role::Read,
                    shard.shard_id,
                )?);
                resolved.push(precedence::resolve(
                    &self.general,
                    set,
                    Role::Write,
                    shard.shard_id,
                )?);
            }
        }
        Ok(resolved)
    }
}
