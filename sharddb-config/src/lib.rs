//! Configuration schema and precedence-merge logic for `sharddb`.
//!
//! A shard set's connections are resolved once, at shard-map construction
//! time, by layering four tiers (lowest to highest): [`General`] →
//! [`ShardSetConfig::defaults`] → [`ShardSetConfig::read`]/[`ShardSetConfig::write`]
//! → [`ShardEntry::read_connection`]/[`ShardEntry::write_connection`].

mod connection;
mod core;
mod error;
mod general;
mod precedence;
mod shard_set;

pub use connection::{DbConnection, DbConnectionEntry};
pub use core::Config;
pub use error::Error;
pub use general::General;
pub use precedence::{resolve, ResolvedConnection, Role};
pub use shard_set::{ShardEntry, ShardSetConfig};
