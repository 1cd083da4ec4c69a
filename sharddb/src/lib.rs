//! Client-side sharded-database access core.
//!
//! Fans a single logical query out across a horizontally partitioned
//! shard set, collects the per-shard results, and assembles them into
//! strongly-typed application models via a compile-time-generated
//! [`sharddb_types::Mappable`] implementation.
//!
//! The two subsystems that matter: [`fanout`] (concurrent dispatch,
//! aggregation, first-success short-circuiting, cancellation) and
//! [`mapper`] (validating and invoking the per-type encode/decode
//! functions `#[derive(Mappable)]` generates). [`api`] is the thin,
//! strongly-typed surface applications actually call; [`shard_map`] and
//! [`backend`] are the immutable topology and the per-connection
//! resilience envelope those two subsystems run on top of.

pub mod api;
pub mod backend;
mod error;
pub mod fanout;
pub mod mapper;
mod params;
pub mod shard_map;

pub use backend::{Connection, ConnectionFactory, ConnectionManager, DriverError, Query, RawOutcome, ResultHandler};
pub use error::Error;
pub use fanout::{ShardKeyColumn, ShardsValues};
pub use params::Params;
pub use shard_map::{ShardInstance, ShardMap};

pub use sharddb_types::{ColumnRef, DbType, KeyComponent, KeyRole, MapBinding, Mappable, OwnedRow, RowAccess, ShardKey, Value};

pub use api::ShardedApi;
