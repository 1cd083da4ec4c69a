//! The connection manager: per-connection `Query`/`List`/
//! `Run`/`Batch` primitives, each run inside a [`ResiliencePolicy`]
//! envelope.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::driver::{ConnectionFactory, DriverError, Query, RawOutcome, ResultHandler};
use super::pool::Pool;
use super::resilience::ResiliencePolicy;
use crate::{Error, Params};
use sharddb_types::FromValue;

/// One logical endpoint: a pool of connections plus the resilience policy
/// guarding dispatch onto it.
pub struct ConnectionManager {
    pool: Pool,
    policy: ResiliencePolicy,
}

impl ConnectionManager {
    pub fn new(resolved: sharddb_config::ResolvedConnection, factory: Arc<dyn ConnectionFactory>) -> Self {
        let policy = ResiliencePolicy::new(&resolved);
        Self {
            pool: Pool::new(resolved, factory),
            policy,
        }
    }

    pub fn resolved(&self) -> &sharddb_config::ResolvedConnection {
        self.pool.resolved()
    }

    /// Execute `query`, then hand the raw outcome to `handler` for
    /// decoding into `T`. The common entry point every typed public API
    /// method (§4.G) composes from.
    pub async fn query<Arg, T>(
        &self,
        query: &Query,
        params: &Params,
        handler: &dyn ResultHandler<Arg, T>,
        arg: &Arg,
        shard_id: u16,
        ct: &CancellationToken,
    ) -> Result<T, Error> {
        if !query.is_valid() {
            return Err(Error::InvalidMapping {
                type_name: "Query",
                reason: "query name and sql must both be non-empty".into(),
            });
        }

        let outcome = self.execute(query, params, ct).await?;
        handler.handle(shard_id, query, arg, outcome)
    }

    /// `Run`: fire-and-ignore, discarding whatever the driver
    /// returned.
    pub async fn run(&self, query: &Query, params: &Params, ct: &CancellationToken) -> Result<(), Error> {
        self.execute(query, params, ct).await?;
        Ok(())
    }

    /// `List<V>`: lift a single named column out of every row
    /// of the first result set.
    pub async fn list<V: FromValue>(&self, query: &Query, params: &Params, column: &str, ct: &CancellationToken) -> Result<Vec<V>, Error> {
        let outcome = self.execute(query, params, ct).await?;
        lift_column(&outcome, column)
    }

    /// Two-column variant of [`ConnectionManager::list`], returning a
    /// tuple per row.
    pub async fn list2<A: FromValue, B: FromValue>(
        &self,
        query: &Query,
        params: &Params,
        column_a: &str,
        column_b: &str,
        ct: &CancellationToken,
    ) -> Result<Vec<(A, B)>, Error> {
        let outcome = self.execute(query, params, ct).await?;
        let a = lift_column::<A>(&outcome, column_a)?;
        let b = lift_column::<B>(&outcome, column_b)?;
        Ok(a.into_iter().zip(b).collect())
    }

    /// Three-column variant of [`ConnectionManager::list`].
    pub async fn list3<A: FromValue, B: FromValue, C: FromValue>(
        &self,
        query: &Query,
        params: &Params,
        column_a: &str,
        column_b: &str,
        column_c: &str,
        ct: &CancellationToken,
    ) -> Result<Vec<(A, B, C)>, Error> {
        let outcome = self.execute(query, params, ct).await?;
        let a = lift_column::<A>(&outcome, column_a)?;
        let b = lift_column::<B>(&outcome, column_b)?;
        let c = lift_column::<C>(&outcome, column_c)?;
        Ok(a.into_iter().zip(b).zip(c).map(|((a, b), c)| (a, b, c)).collect())
    }

    /// `Batch`: an ordered sequence of statements against one connection,
    /// sequential within it, awaited as a whole.
    pub async fn batch(&self, queries: &[(Query, Params)], ct: &CancellationToken) -> Result<(), Error> {
        for (query, params) in queries {
            self.execute(query, params, ct).await?;
        }
        Ok(())
    }

    async fn execute(&self, query: &Query, params: &Params, ct: &CancellationToken) -> Result<RawOutcome, Error> {
        debug!(query = query.name(), "executing");
        let mut conn = self.pool.checkout(ct).await?;
        let command_timeout = Duration::from_millis(self.resolved().command_timeout_ms);

        self.policy
            .call(ct, || async {
                match tokio::time::timeout(command_timeout, conn.execute(query, params)).await {
                    Ok(result) => result,
                    Err(_) => Err(DriverError::transient(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "command timed out",
                    ))),
                }
            })
            .await
    }
}

/// Lift one named column out of every row of `outcome`'s first result
/// set, used by [`ConnectionManager::list`] and its tuple variants.
fn lift_column<V: FromValue>(outcome: &RawOutcome, column: &str) -> Result<Vec<V>, Error> {
    let rows = outcome.result_sets.first().map(Vec::as_slice).unwrap_or(&[]);
    rows.iter()
        .map(|row| {
            let value = row
                .columns
                .iter()
                .find(|(name, _)| name == column)
                .map(|(_, value)| value)
                .ok_or_else(|| Error::InvalidMapping {
                    type_name: "List",
                    reason: format!("column \"{column}\" not present in result set"),
                })?;
            Ok(V::from_value(value)?)
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::driver::{Connection, DriverError};
    use async_trait::async_trait;
    use sharddb_config::Role;
    use sharddb_types::{OwnedRow, Value};

    struct EchoConnection;

    #[async_trait]
    impl Connection for EchoConnection {
        async fn execute(&mut self, _query: &Query, _params: &Params) -> Result<RawOutcome, DriverError> {
            Ok(RawOutcome::single(vec![OwnedRow::new(vec![(
                "id".into(),
                Value::Int(7),
            )])]))
        }
    }

    struct EchoFactory;

    #[async_trait]
    impl ConnectionFactory for EchoFactory {
        async fn connect(
            &self,
            _resolved: &sharddb_config::ResolvedConnection,
        ) -> Result<Box<dyn Connection>, DriverError> {
            Ok(Box::new(EchoConnection))
        }
    }

    fn resolved() -> sharddb_config::ResolvedConnection {
        sharddb_config::ResolvedConnection {
            shard_set_name: "customers".into(),
            shard_id: 0,
            role: Role::Read,
            server: "localhost".into(),
            database: "customers".into(),
            security_key: None,
            data_resilience_key: None,
            connect_timeout_ms: 1_000,
            command_timeout_ms: 1_000,
            pool_size: 1,
            retry_attempts: 0,
            retry_backoff_ms: 0,
            circuit_breaker_threshold: 5,
            circuit_breaker_reset_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn query_dispatches_to_handler() {
        let manager = ConnectionManager::new(resolved(), Arc::new(EchoFactory));
        let ct = CancellationToken::new();
        let query = Query::new("get_id", "SELECT id");

        let handler = |_shard_id: u16, _query: &Query, _arg: &(), outcome: RawOutcome| -> Result<i64, Error> {
            let row = &outcome.result_sets[0][0];
            match row.columns[0].1 {
                Value::Int(v) => Ok(v as i64),
                _ => unreachable!(),
            }
        };

        let result = manager.query(&query, &Params::new(), &handler, &(), 0, &ct).await.unwrap();
        assert_eq!(result, 7);
    }

    struct RowsConnection;

    #[async_trait]
    impl Connection for RowsConnection {
        async fn execute(&mut self, _query: &Query, _params: &Params) -> Result<RawOutcome, DriverError> {
            Ok(RawOutcome::single(vec![
                OwnedRow::new(vec![
                    ("id".into(), Value::BigInt(1)),
                    ("name".into(), Value::Text("alice".into())),
                ]),
                OwnedRow::new(vec![
                    ("id".into(), Value::BigInt(2)),
                    ("name".into(), Value::Text("bob".into())),
                ]),
            ]))
        }
    }

    struct RowsFactory;

    #[async_trait]
    impl ConnectionFactory for RowsFactory {
        async fn connect(
            &self,
            _resolved: &sharddb_config::ResolvedConnection,
        ) -> Result<Box<dyn Connection>, DriverError> {
            Ok(Box::new(RowsConnection))
        }
    }

    #[tokio::test]
    async fn list_lifts_a_single_column() {
        let manager = ConnectionManager::new(resolved(), Arc::new(RowsFactory));
        let ct = CancellationToken::new();
        let ids: Vec<i64> = manager
            .list(&Query::new("list_ids", "SELECT id, name"), &Params::new(), "id", &ct)
            .await
            .unwrap();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn list2_zips_two_columns_per_row() {
        let manager = ConnectionManager::new(resolved(), Arc::new(RowsFactory));
        let ct = CancellationToken::new();
        let rows: Vec<(i64, String)> = manager
            .list2(&Query::new("list_rows", "SELECT id, name"), &Params::new(), "id", "name", &ct)
            .await
            .unwrap();
        assert_eq!(rows, vec![(1, "alice".to_string()), (2, "bob".to_string())]);
    }

    #[tokio::test]
    async fn list_reports_an_unknown_column() {
        let manager = ConnectionManager::new(resolved(), Arc::new(RowsFactory));
        let ct = CancellationToken::new();
        let err = manager
            .list::<i64>(&Query::new("list_ids", "SELECT id"), &Params::new(), "nope", &ct)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidMapping { .. }));
    }

    struct SlowConnection;

    #[async_trait]
    impl Connection for SlowConnection {
        async fn execute(&mut self, _query: &Query, _params: &Params) -> Result<RawOutcome, DriverError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(RawOutcome::default())
        }
    }

    struct SlowFactory;

    #[async_trait]
    impl ConnectionFactory for SlowFactory {
        async fn connect(
            &self,
            _resolved: &sharddb_config::ResolvedConnection,
        ) -> Result<Box<dyn Connection>, DriverError> {
            Ok(Box::new(SlowConnection))
        }
    }

    fn resolved_with_short_command_timeout() -> sharddb_config::ResolvedConnection {
        sharddb_config::ResolvedConnection {
            command_timeout_ms: 5,
            ..resolved()
        }
    }

    #[tokio::test]
    async fn command_timeout_surfaces_as_a_transient_error() {
        let manager = ConnectionManager::new(resolved_with_short_command_timeout(), Arc::new(SlowFactory));
        let ct = CancellationToken::new();

        let err = manager
            .run(&Query::new("slow", "SELECT pg_sleep(1)"), &Params::new(), &ct)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Transient(_)));
    }
}
