//! Connection pooling, grounded on the teacher's own
//! `backend::pool::Pool`: an `Arc`-shared handle around a mutex-guarded
//! idle list, sized by a semaphore so checkout blocks rather than
//! over-opening connections.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sharddb_config::ResolvedConnection;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::driver::{Connection, ConnectionFactory, DriverError, Query, RawOutcome};
use crate::{Error, Params};

struct PoolInner {
    resolved: ResolvedConnection,
    factory: Arc<dyn ConnectionFactory>,
    idle: Mutex<Vec<Box<dyn Connection>>>,
    semaphore: Arc<Semaphore>,
}

/// A pool of connections to one resolved endpoint (one shard's read or
/// write handle).
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    pub fn new(resolved: ResolvedConnection, factory: Arc<dyn ConnectionFactory>) -> Self {
        let semaphore = Arc::new(Semaphore::new(resolved.pool_size.max(1)));
        Self {
            inner: Arc::new(PoolInner {
                resolved,
                factory,
                idle: Mutex::new(Vec::new()),
                semaphore,
            }),
        }
    }

    pub fn resolved(&self) -> &ResolvedConnection {
        &self.inner.resolved
    }

    /// Check out a connection, opening one if the idle list is empty or
    /// every idle connection has gone unhealthy. Blocks until a pool slot
    /// is free or `ct` is cancelled.
    pub async fn checkout(&self, ct: &CancellationToken) -> Result<PooledConnection, Error> {
        let permit = tokio::select! {
            permit = self.inner.semaphore.clone().acquire_owned() => {
                permit.expect("pool semaphore is never closed")
            }
            _ = ct.cancelled() => return Err(Error::OperationCancelled),
        };

        let existing = {
            let mut idle = self.inner.idle.lock();
            idle.pop()
        };

        let conn = match existing {
            Some(conn) if conn.is_healthy() => conn,
            _ => self.open(ct).await?,
        };

        Ok(PooledConnection {
            pool: self.clone(),
            conn: Some(conn),
            _permit: permit,
        })
    }

    async fn open(&self, ct: &CancellationToken) -> Result<Box<dyn Connection>, Error> {
        let timeout = Duration::from_millis(self.inner.resolved.connect_timeout_ms);
        debug!(server = %self.inner.resolved.server, "opening connection");

        tokio::select! {
            result = tokio::time::timeout(timeout, self.inner.factory.connect(&self.inner.resolved)) => {
                match result {
                    Ok(Ok(conn)) => Ok(conn),
                    Ok(Err(driver_err)) => Err(Error::Transient(Box::new(driver_err))),
                    Err(_) => Err(Error::Transient(Box::new(DriverError::transient(
                        std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
                    )))),
                }
            }
            _ = ct.cancelled() => Err(Error::OperationCancelled),
        }
    }

    fn checkin(&self, conn: Box<dyn Connection>) {
        if conn.is_healthy() {
            self.inner.idle.lock().push(conn);
        }
    }
}

/// A connection checked out of a [`Pool`]; returned to the idle list on
/// drop if it's still healthy, otherwise dropped outright.
pub struct PooledConnection {
    pool: Pool,
    conn: Option<Box<dyn Connection>>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub async fn execute(&mut self, query: &Query, params: &Params) -> Result<RawOutcome, DriverError> {
        self.conn
            .as_mut()
            .expect("connection present for the lifetime of the guard")
            .execute(query, params)
            .await
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.checkin(conn);
        }
    }
}
