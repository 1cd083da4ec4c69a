//! The connection manager: driver-independent pooling, a
//! retry/circuit-breaker resilience envelope, and the `Query`/`List`/
//! `Run`/`Batch` primitives the fan-out engine dispatches onto.

pub mod driver;
pub mod manager;
pub mod pool;
pub mod resilience;

pub use driver::{Connection, ConnectionFactory, DriverError, Query, RawOutcome, ResultHandler};
pub use manager::ConnectionManager;
pub use pool::Pool;
pub use resilience::{DefaultClassifier, ResiliencePolicy, TransientClassifier};
