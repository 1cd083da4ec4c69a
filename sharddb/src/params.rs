//! The parameter abstraction lives in `sharddb-types`, so that
//! proc-macro-generated `Mappable` impls and this crate's fan-out engine
//! share one definition without a dependency cycle.

pub use sharddb_types::Params;
