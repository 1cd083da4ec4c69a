//! The shard-set fan-out engine: the critical concurrency
//! component. `ReadAll`, `ReadFirst`, `Write`, and `Batch` all share the
//! same target-resolution and per-shard parameter substitution, then
//! diverge only in how they aggregate task completions — mirroring the
//! teacher's `backend::pool::Cluster` fan-out over its shard list for
//! cross-shard statements.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{ConnectionManager, Query, RawOutcome, ResultHandler};
use crate::shard_map::{ShardInstance, ShardMap};
use crate::Error;
use sharddb_types::{KeyComponent, Params, ShardKey, Value};

/// A caller-supplied map of `shardId -> per-shard parameter overrides`
///: both which shards to target and, per
/// shard, which parameter values to stamp in before dispatch.
#[derive(Debug, Clone, Default)]
pub struct ShardsValues {
    shards: BTreeMap<u16, Vec<(String, Value)>>,
}

impl ShardsValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target `shard_id`, with no per-shard parameter overrides.
    pub fn with_shard(mut self, shard_id: u16) -> Self {
        self.shards.entry(shard_id).or_default();
        self
    }

    /// Target `shard_id`, overriding `name` to `value` before dispatch.
    pub fn with_override(mut self, shard_id: u16, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.shards.entry(shard_id).or_default().push((name.into(), value.into()));
        self
    }

    pub fn shard_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.shards.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    fn overrides_for(&self, shard_id: u16) -> &[(String, Value)] {
        self.shards.get(&shard_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Clone, Copy)]
enum Target {
    Read,
    Write,
}

fn manager(instance: &ShardInstance, target: Target) -> &ConnectionManager {
    match target {
        Target::Read => instance.read(),
        Target::Write => instance.write(),
    }
}

/// Step 1 of the common fan-out loop: determine target shards.
/// `None` targets every shard in the map; `Some` targets exactly
/// the shards named, failing if one doesn't exist.
fn resolve_targets(shard_map: &ShardMap, shards_values: Option<&ShardsValues>) -> Result<Vec<u16>, Error> {
    match shards_values {
        None => Ok(shard_map.shard_ids().collect()),
        Some(values) => {
            for shard_id in values.shard_ids() {
                if shard_map.get(shard_id).is_none() {
                    return Err(Error::UnknownShard(shard_id));
                }
            }
            Ok(values.shard_ids().collect())
        }
    }
}

/// Step 2: clone the template collection, stamp the shard-id slot, and
/// apply this shard's overrides, if any.
fn per_shard_params(
    template: &Params,
    shard_param_ordinal: Option<usize>,
    shard_id: u16,
    shards_values: Option<&ShardsValues>,
) -> Result<Params, Error> {
    let mut params = template.clone();
    if let Some(ordinal) = shard_param_ordinal {
        params.set_shard_id(ordinal, shard_id)?;
    }
    if let Some(values) = shards_values {
        for (name, value) in values.overrides_for(shard_id) {
            params.force_set(name.clone(), value.clone());
        }
    }
    Ok(params)
}

fn check_preconditions(query: &Query, ct: &CancellationToken) -> Result<(), Error> {
    if !query.is_valid() {
        return Err(Error::InvalidMapping {
            type_name: "Query",
            reason: "query name and sql must both be non-empty".into(),
        });
    }
    if ct.is_cancelled() {
        return Err(Error::OperationCancelled);
    }
    Ok(())
}

/// Shared spawn loop for `ReadAll`/`ReadFirst`/`Write`: one task per
/// target shard, each running `query` against its resolved connection
/// manager and dispatching through `handler`.
fn spawn_per_shard<Arg, T>(
    shard_map: &ShardMap,
    target: Target,
    query: &Query,
    params: &Params,
    shard_param_ordinal: Option<usize>,
    shards_values: Option<&ShardsValues>,
    handler: Arc<dyn ResultHandler<Arg, T>>,
    arg: Arc<Arg>,
    ct: &CancellationToken,
) -> Result<JoinSet<Result<T, Error>>, Error>
where
    Arg: Send + Sync + 'static,
    T: Send + 'static,
{
    let targets = resolve_targets(shard_map, shards_values)?;
    let mut set = JoinSet::new();
    for shard_id in targets {
        let params = per_shard_params(params, shard_param_ordinal, shard_id, shards_values)?;
        let shard_map = shard_map.clone();
        let query = query.clone();
        let handler = handler.clone();
        let arg = arg.clone();
        let ct = ct.clone();
        set.spawn(async move {
            let instance = shard_map.get(shard_id).ok_or(Error::UnknownShard(shard_id))?;
            manager(instance, target)
                .query(&query, &params, handler.as_ref(), arg.as_ref(), shard_id, &ct)
                .await
        });
    }
    Ok(set)
}

/// `ReadAll`: await every task, then collect every result.
/// Completion order, not dispatch order. An error from any shard
/// propagates once every task has settled (§7: "surfaces the first
/// exception after all tasks settle").
pub async fn read_all<Arg, T>(
    shard_map: &ShardMap,
    query: &Query,
    params: &Params,
    shard_param_ordinal: Option<usize>,
    shards_values: Option<&ShardsValues>,
    handler: Arc<dyn ResultHandler<Arg, T>>,
    arg: Arc<Arg>,
    ct: &CancellationToken,
) -> Result<Vec<T>, Error>
where
    Arg: Send + Sync + 'static,
    T: Send + 'static,
{
    check_preconditions(query, ct)?;
    if let Some(values) = shards_values {
        if values.is_empty() {
            return Ok(Vec::new());
        }
    }

    let mut set = spawn_per_shard(shard_map, Target::Read, query, params, shard_param_ordinal, shards_values, handler, arg, ct)?;

    let mut results = Vec::new();
    let mut first_err = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(value)) => results.push(value),
            Ok(Err(err)) => {
                warn!(?err, "read_all: shard task failed");
                first_err.get_or_insert(err);
            }
            Err(join_err) if join_err.is_cancelled() => {}
            Err(join_err) => {
                first_err.get_or_insert(Error::Transient(Box::new(join_err)));
            }
        }
    }

    match first_err {
        Some(err) => Err(err),
        None => Ok(results),
    }
}

/// `Write`: structurally identical to `ReadAll` but targets
/// each shard's write (primary) connection.
pub async fn write<Arg, T>(
    shard_map: &ShardMap,
    query: &Query,
    params: &Params,
    shard_param_ordinal: Option<usize>,
    shards_values: Option<&ShardsValues>,
    handler: Arc<dyn ResultHandler<Arg, T>>,
    arg: Arc<Arg>,
    ct: &CancellationToken,
) -> Result<Vec<T>, Error>
where
    Arg: Send + Sync + 'static,
    T: Send + 'static,
{
    check_preconditions(query, ct)?;
    if let Some(values) = shards_values {
        if values.is_empty() {
            return Ok(Vec::new());
        }
    }

    let mut set = spawn_per_shard(shard_map, Target::Write, query, params, shard_param_ordinal, shards_values, handler, arg, ct)?;

    let mut results = Vec::new();
    let mut first_err = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(value)) => results.push(value),
            Ok(Err(err)) => {
                warn!(?err, "write: shard task failed");
                first_err.get_or_insert(err);
            }
            Err(join_err) if join_err.is_cancelled() => {}
            Err(join_err) => {
                first_err.get_or_insert(Error::Transient(Box::new(join_err)));
            }
        }
    }

    match first_err {
        Some(err) => Err(err),
        None => Ok(results),
    }
}

/// `ReadFirst`: the first shard to return `Some(_)` wins and
/// cancels its siblings through a locally linked token. A
/// sibling's `Cancelled` or benign aggregate error is ignored; any other
/// error aborts the whole race immediately — the fail-fast policy
/// SPEC_FULL §F records as deliberate rather than an open question.
/// Returns `None` if every shard returns `None`.
pub async fn read_first<Arg, T>(
    shard_map: &ShardMap,
    query: &Query,
    params: &Params,
    shard_param_ordinal: Option<usize>,
    shards_values: Option<&ShardsValues>,
    handler: Arc<dyn ResultHandler<Arg, Option<T>>>,
    arg: Arc<Arg>,
    ct: &CancellationToken,
) -> Result<Option<T>, Error>
where
    Arg: Send + Sync + 'static,
    T: Send + 'static,
{
    check_preconditions(query, ct)?;
    if let Some(values) = shards_values {
        if values.is_empty() {
            return Ok(None);
        }
    }

    let linked = ct.child_token();
    let mut set = spawn_per_shard(
        shard_map,
        Target::Read,
        query,
        params,
        shard_param_ordinal,
        shards_values,
        handler,
        arg,
        &linked,
    )?;

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(Some(value))) => {
                debug!("read_first: shard produced a result, cancelling siblings");
                linked.cancel();
                set.abort_all();
                return Ok(Some(value));
            }
            Ok(Ok(None)) => continue,
            Ok(Err(err)) if err.is_benign_for_read_first() => continue,
            Ok(Err(err)) => {
                warn!(?err, "read_first: aborting on non-benign shard error");
                linked.cancel();
                set.abort_all();
                return Err(err);
            }
            Err(join_err) if join_err.is_cancelled() => continue,
            Err(join_err) => {
                linked.cancel();
                set.abort_all();
                return Err(Error::Transient(Box::new(join_err)));
            }
        }
    }

    Ok(None)
}

/// `Batch`: an ordered sequence of statements run against
/// every target shard's write connection. Within a shard the statements
/// run in submitted order (one connection); across shards, no ordering.
pub async fn batch(
    shard_map: &ShardMap,
    queries: &[(Query, Params)],
    shard_param_ordinal: Option<usize>,
    shards_values: Option<&ShardsValues>,
    ct: &CancellationToken,
) -> Result<(), Error> {
    if ct.is_cancelled() {
        return Err(Error::OperationCancelled);
    }
    if let Some(values) = shards_values {
        if values.is_empty() {
            return Ok(());
        }
    }

    let targets = resolve_targets(shard_map, shards_values)?;
    let mut set = JoinSet::new();
    for shard_id in targets {
        let per_shard_queries = queries
            .iter()
            .map(|(query, params)| {
                let params = per_shard_params(params, shard_param_ordinal, shard_id, shards_values)?;
                Ok((query.clone(), params))
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let shard_map = shard_map.clone();
        let ct = ct.clone();
        set.spawn(async move {
            let instance = shard_map.get(shard_id).ok_or(Error::UnknownShard(shard_id))?;
            instance.write().batch(&per_shard_queries, &ct).await
        });
    }

    let mut first_err = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(?err, "batch: shard task failed");
                first_err.get_or_insert(err);
            }
            Err(join_err) if join_err.is_cancelled() => {}
            Err(join_err) => {
                first_err.get_or_insert(Error::Transient(Box::new(join_err)));
            }
        }
    }

    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Which column of a row to lift into a [`ShardKey`] component, and
/// which origin byte to tag it with.
#[derive(Debug, Clone, Copy)]
pub struct ShardKeyColumn {
    pub origin: u8,
    pub column: &'static str,
}

/// A specialized `ReadAll` that lifts a scalar column into a [`ShardKey`]
/// per row, stamping each key with the shard that produced it — the
/// core's means of returning identity values that reference specific
/// shards.
pub async fn read_all_shard_keys(
    shard_map: &ShardMap,
    query: &Query,
    params: &Params,
    shard_param_ordinal: Option<usize>,
    shards_values: Option<&ShardsValues>,
    key_column: ShardKeyColumn,
    ct: &CancellationToken,
) -> Result<Vec<ShardKey>, Error> {
    let handler: Arc<dyn ResultHandler<(), Vec<ShardKey>>> =
        Arc::new(move |shard_id: u16, _query: &Query, _arg: &(), outcome: RawOutcome| {
            let mut keys = Vec::new();
            for rows in &outcome.result_sets {
                for row in rows {
                    if let Some((_, value)) = row.columns.iter().find(|(name, _)| name == key_column.column) {
                        if let Some(component) = KeyComponent::from_value(value) {
                            keys.push(ShardKey::new(key_column.origin, shard_id, component));
                        }
                    }
                }
            }
            Ok(keys)
        });

    let per_shard = read_all(
        shard_map,
        query,
        params,
        shard_param_ordinal,
        shards_values,
        handler,
        Arc::new(()),
        ct,
    )
    .await?;

    Ok(per_shard.into_iter().flatten().collect())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::driver::{Connection, ConnectionFactory, DriverError};
    use async_trait::async_trait;
    use sharddb_config::{Config, Role};
    use sharddb_types::OwnedRow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct DelayedConnection {
        delay: Duration,
        value: Option<i64>,
    }

    #[async_trait]
    impl Connection for DelayedConnection {
        async fn execute(&mut self, _query: &Query, _params: &Params) -> Result<RawOutcome, DriverError> {
            tokio::time::sleep(self.delay).await;
            match self.value {
                Some(v) => Ok(RawOutcome::single(vec![OwnedRow::new(vec![("id".into(), Value::Int(v as i32))])])),
                None => Ok(RawOutcome::single(vec![])),
            }
        }
    }

    struct DelayedFactory {
        delay: Duration,
        value: Option<i64>,
        opens: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ConnectionFactory for DelayedFactory {
        async fn connect(
            &self,
            _resolved: &sharddb_config::ResolvedConnection,
        ) -> Result<Box<dyn Connection>, DriverError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(DelayedConnection {
                delay: self.delay,
                value: self.value,
            }))
        }
    }

    fn two_shard_config() -> Config {
        let toml_source = r#"
[[shard_sets]]
shard_set_name = "customers"
default_shard_id = 0

[shard_sets.defaults]
database = "customers"

[[shard_sets.shards]]
shard_id = 1

[shard_sets.shards.read_connection]
server = "replica-1"

[shard_sets.shards.write_connection]
server = "primary-1"

[[shard_sets.shards]]
shard_id = 2

[shard_sets.shards.read_connection]
server = "replica-2"

[shard_sets.shards.write_connection]
server = "primary-2"
"#;
        toml::from_str(toml_source).unwrap()
    }

    fn row_to_id(_shard_id: u16, _query: &Query, _arg: &(), outcome: RawOutcome) -> Result<i64, Error> {
        let row = &outcome.result_sets[0][0];
        match row.columns[0].1 {
            Value::Int(v) => Ok(v as i64),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn read_all_collects_one_result_per_shard() {
        let config = two_shard_config();
        let factory = Arc::new(DelayedFactory {
            delay: Duration::from_millis(1),
            value: Some(9),
            opens: Arc::new(AtomicUsize::new(0)),
        });
        let shard_map = ShardMap::build(&config, "customers", factory).unwrap();
        let ct = CancellationToken::new();

        let handler: Arc<dyn ResultHandler<(), i64>> = Arc::new(row_to_id);
        let results = read_all(
            &shard_map,
            &Query::new("get_id", "SELECT id"),
            &Params::new(),
            None,
            None,
            handler,
            Arc::new(()),
            &ct,
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|&v| v == 9));
    }

    #[tokio::test]
    async fn empty_shards_values_short_circuits_without_spawning() {
        let config = two_shard_config();
        let factory = Arc::new(DelayedFactory {
            delay: Duration::from_millis(1),
            value: Some(9),
            opens: Arc::new(AtomicUsize::new(0)),
        });
        let opens = factory.opens.clone();
        let shard_map = ShardMap::build(&config, "customers", factory).unwrap();
        let ct = CancellationToken::new();

        let handler: Arc<dyn ResultHandler<(), i64>> = Arc::new(row_to_id);
        let results = read_all(
            &shard_map,
            &Query::new("get_id", "SELECT id"),
            &Params::new(),
            None,
            Some(&ShardsValues::new()),
            handler,
            Arc::new(()),
            &ct,
        )
        .await
        .unwrap();

        assert!(results.is_empty());
        assert_eq!(opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn read_first_returns_the_faster_shard_and_cancels_the_slower() {
        let config = two_shard_config();

        struct TwoSpeedFactory {
            opens: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl ConnectionFactory for TwoSpeedFactory {
            async fn connect(
                &self,
                resolved: &sharddb_config::ResolvedConnection,
            ) -> Result<Box<dyn Connection>, DriverError> {
                self.opens.fetch_add(1, Ordering::SeqCst);
                let (delay, value) = if resolved.shard_id == 1 {
                    (Duration::from_millis(200), Some(1))
                } else {
                    (Duration::from_millis(5), Some(2))
                };
                Ok(Box::new(DelayedConnection { delay, value }))
            }
        }

        let factory = Arc::new(TwoSpeedFactory {
            opens: Arc::new(AtomicUsize::new(0)),
        });
        let shard_map = ShardMap::build(&config, "customers", factory).unwrap();
        let ct = CancellationToken::new();

        let handler: Arc<dyn ResultHandler<(), Option<i64>>> =
            Arc::new(|shard_id, query, arg, outcome| row_to_id(shard_id, query, arg, outcome).map(Some));

        let started = tokio::time::Instant::now();
        let result = read_first(
            &shard_map,
            &Query::new("get_id", "SELECT id"),
            &Params::new(),
            None,
            None,
            handler,
            Arc::new(()),
            &ct,
        )
        .await
        .unwrap();

        assert_eq!(result, Some(2));
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn unknown_shard_in_shards_values_is_rejected() {
        let config = two_shard_config();
        let factory = Arc::new(DelayedFactory {
            delay: Duration::from_millis(1),
            value: Some(1),
            opens: Arc::new(AtomicUsize::new(0)),
        });
        let shard_map = ShardMap::build(&config, "customers", factory).unwrap();
        let ct = CancellationToken::new();

        let handler: Arc<dyn ResultHandler<(), i64>> = Arc::new(row_to_id);
        let err = read_all(
            &shard_map,
            &Query::new("get_id", "SELECT id"),
            &Params::new(),
            None,
            Some(&ShardsValues::new().with_shard(99)),
            handler,
            Arc::new(()),
            &ct,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::UnknownShard(99)));
    }

    #[test]
    fn role_is_unused_marker_suppresses_dead_code_warning() {
        let _ = Role::Read;
    }
}
