//! The driver boundary: the trait surface a concrete wire driver (SQL
//! Server, PostgreSQL, ...) implements. A specific wire driver for any
//! one database is out of scope here; this module is the interface that
//! leaves behind, mirroring the split between generic pooling
//! (`backend::pool`) and a concrete wire-protocol implementation.

use std::fmt;

use async_trait::async_trait;
use sharddb_config::ResolvedConnection;
use sharddb_types::{OwnedRow, Value};

/// A named, parameterized statement or stored procedure invocation.
///
/// The common fan-out precondition requires this to carry a non-empty
/// `name` and `sql`; [`Query::new`] enforces that at construction rather
/// than leaving it to be checked per call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    name: String,
    sql: String,
}

impl Query {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        let name = name.into();
        let sql = sql.into();
        debug_assert!(!name.is_empty(), "query name must not be empty");
        debug_assert!(!sql.is_empty(), "query sql must not be empty");
        Self { name, sql }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && !self.sql.is_empty()
    }
}

/// Everything a driver invocation can hand back: up to the result sets a
/// procedure produced plus whatever output parameters it populated.
///
/// The `ModelFromResults` algorithm is keyed by up to eight result
/// sets; an overload-per-arity surface isn't needed here, so this just
/// holds however many result
/// sets the driver actually returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOutcome {
    pub result_sets: Vec<Vec<OwnedRow>>,
    pub out_params: Vec<(String, Value)>,
}

impl RawOutcome {
    pub fn single(rows: Vec<OwnedRow>) -> Self {
        Self {
            result_sets: vec![rows],
            out_params: Vec::new(),
        }
    }
}

/// A driver-raised error, tagged with whether the resilience policy
/// should treat it as transient.
///
/// The classification is supplied by the driver because only the driver
/// knows which of its own error kinds (a dropped socket, a deadlock
/// victim, a timeout) are safe to retry; the [`super::resilience`]
/// module just acts on the flag.
#[derive(Debug)]
pub struct DriverError {
    pub source: Box<dyn std::error::Error + Send + Sync>,
    pub transient: bool,
}

impl DriverError {
    pub fn transient(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            source: Box::new(source),
            transient: true,
        }
    }

    pub fn permanent(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self {
            source: Box::new(source),
            transient: false,
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// One connection checked out of a [`super::Pool`].
///
/// Opening a connection, executing a query, and reading a result are the
/// three suspension points  names; a `Connection` is exclusive to
/// one in-flight call, enforced by the pool rather than this trait.
#[async_trait]
pub trait Connection: Send {
    async fn execute(&mut self, query: &Query, params: &crate::Params) -> Result<RawOutcome, DriverError>;

    /// Whether this connection is still usable. A pool checks this before
    /// returning a connection to its idle set; a connection that fails
    /// this check is dropped rather than reused.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// Opens new connections for a specific resolved endpoint (one shard's
/// read handle, or its write handle).
///
/// This is the seam applications cross to plug in a concrete driver; the
/// core never constructs one itself.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn connect(&self, resolved: &ResolvedConnection) -> Result<Box<dyn Connection>, DriverError>;
}

/// Selects which of the provided result sets/out-params a typed caller
/// wants, and decodes them into `T`.
///
/// Spec §4.E: "the handler is supplied by the caller so the manager is
/// decoupled from mapping." The three handler shapes the public API
/// (§4.G) composes from are model-from-out, model-from-reader, and
/// list-from-reader; all three are expressible as a closure over
/// [`RawOutcome`], so this trait has a single method rather than the
/// source's `Handler<TArg, TModel>` delegate-per-shape split.
pub trait ResultHandler<Arg, T>: Send + Sync {
    fn handle(&self, shard_id: u16, query: &Query, arg: &Arg, outcome: RawOutcome) -> Result<T, crate::Error>;
}

impl<Arg, T, F> ResultHandler<Arg, T> for F
where
    F: Fn(u16, &Query, &Arg, RawOutcome) -> Result<T, crate::Error> + Send + Sync,
{
    fn handle(&self, shard_id: u16, query: &Query, arg: &Arg, outcome: RawOutcome) -> Result<T, crate::Error> {
        self(shard_id, query, arg, outcome)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn query_validity() {
        let q = Query::new("get_user", "SELECT 1");
        assert!(q.is_valid());
    }
}
