//! Driver-independent value representation shared by `sharddb`'s
//! parameter abstraction and mapping attributes.

mod db_type;
mod error;
mod mapping;
mod params;
mod row;
mod shard_key;
mod value;

pub use db_type::DbType;
pub use error::Error;
pub use mapping::{ColumnRef, KeyRole, MapBinding, Mappable};
pub use params::Params;
pub use row::{OwnedRow, RowAccess};
pub use shard_key::{KeyComponent, ShardKey};
pub use value::{FromValue, ToValue, Value};
