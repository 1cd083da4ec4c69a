use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config file \"{path}\": {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("shard set \"{0}\" is not defined")]
    UnknownShardSet(String),

    #[error("shard set \"{shard_set}\" has no shard {shard_id}")]
    UnknownShard { shard_set: String, shard_id: u16 },

    #[error("shard set \"{shard_set}\" shard {shard_id} has no {field} after merging all tiers")]
    MissingField {
        shard_set: String,
        shard_id: u16,
        field: &'static str,
    },

    #[error("duplicate shard set name \"{0}\"")]
    DuplicateShardSet(String),

    #[error("duplicate shard id {shard_id} in shard set \"{shard_set}\"")]
    DuplicateShard { shard_set: String, shard_id: u16 },
}
