//! The sharded public API: a thin, strongly-typed surface
//! over the fan-out engine ([`crate::fanout`]) and the mapper cache
//! ([`crate::mapper`]).
//!
//! Each method here picks the handler shape §4.D's mapper cache
//! supports (model-from-out, model-from-reader, or list-from-reader) and
//! forwards to §4.F; the result shape (a list, a single optional value,
//! or unit) follows directly from which fan-out surface it calls.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use sharddb_types::{Mappable, Params, ShardKey, Value};

use crate::backend::{Query, RawOutcome, ResultHandler};
use crate::fanout::{self, ShardKeyColumn, ShardsValues};
use crate::mapper;
use crate::shard_map::ShardMap;
use crate::Error;

/// True when an outcome carries nothing a model could be built from —
/// the per-shard "null" `ReadFirst`/`Write` test against.
fn is_empty_outcome(outcome: &RawOutcome) -> bool {
    outcome.result_sets.iter().all(Vec::is_empty) && outcome.out_params.is_empty()
}

fn out_params_collection(outcome: &RawOutcome) -> Params {
    let mut params = Params::new();
    for (name, value) in &outcome.out_params {
        params.append_mapped(name.clone(), value.clone());
    }
    params
}

fn assemble<T: Mappable + Default + 'static>(query: &Query, shard_id: u16, outcome: RawOutcome) -> Result<T, Error> {
    let out_params = out_params_collection(&outcome);
    mapper::assemble_model_from_results::<T>(query.name(), &outcome.result_sets, &out_params, shard_id)
}

/// The strongly-typed façade applications call. Cheap to clone: it only
/// wraps the immutable [`ShardMap`] a shard set was built with.
#[derive(Clone)]
pub struct ShardedApi {
    shard_map: ShardMap,
}

impl ShardedApi {
    pub fn new(shard_map: ShardMap) -> Self {
        Self { shard_map }
    }

    pub fn shard_map(&self) -> &ShardMap {
        &self.shard_map
    }

    /// `mapReader`/ReadAll: assemble one `T` per shard (out-params and/or
    /// result sets, per §4.D's `ModelFromResults`), collecting every
    /// shard's model and omitting shards whose outcome was empty —
    /// spec.md's "given N shards each returning a value, ReadAll returns
    /// exactly N items; given one shard returning null, it returns N−1."
    /// Order is completion order, not dispatch order.
    pub async fn read_all<T>(
        &self,
        query: &Query,
        params: &Params,
        shard_param_ordinal: Option<usize>,
        shards_values: Option<&ShardsValues>,
        ct: &CancellationToken,
    ) -> Result<Vec<T>, Error>
    where
        T: Mappable + Default + Send + 'static,
    {
        mapper::ensure_validated::<T>()?;
        let query_for_handler = query.clone();
        let handler: Arc<dyn ResultHandler<(), Option<T>>> = Arc::new(move |shard_id, _query, _arg, outcome| {
            if is_empty_outcome(&outcome) {
                return Ok(None);
            }
            assemble::<T>(&query_for_handler, shard_id, outcome).map(Some)
        });

        let per_shard = fanout::read_all(&self.shard_map, query, params, shard_param_ordinal, shards_values, handler, Arc::new(()), ct).await?;
        Ok(per_shard.into_iter().flatten().collect())
    }

    /// `mapReader`/ReadFirst: the first shard producing a non-empty
    /// outcome wins; siblings are cancelled. Returns `None` if every
    /// shard's outcome was empty.
    pub async fn read_first<T>(
        &self,
        query: &Query,
        params: &Params,
        shard_param_ordinal: Option<usize>,
        shards_values: Option<&ShardsValues>,
        ct: &CancellationToken,
    ) -> Result<Option<T>, Error>
    where
        T: Mappable + Default + Send + 'static,
    {
        mapper::ensure_validated::<T>()?;
        let query_for_handler = query.clone();
        let handler: Arc<dyn ResultHandler<(), Option<T>>> = Arc::new(move |shard_id, _query, _arg, outcome| {
            if is_empty_outcome(&outcome) {
                return Ok(None);
            }
            assemble::<T>(&query_for_handler, shard_id, outcome).map(Some)
        });

        fanout::read_first(&self.shard_map, query, params, shard_param_ordinal, shards_values, handler, Arc::new(()), ct).await
    }

    /// `mapList`: a `ReadAll` whose per-shard result is a row list rather
    /// than a single assembled model, flattened across every shard into
    /// one combined list — the shape a plain `SELECT` against every
    /// shard returns.
    pub async fn list_all<T>(
        &self,
        query: &Query,
        params: &Params,
        shard_param_ordinal: Option<usize>,
        shards_values: Option<&ShardsValues>,
        ct: &CancellationToken,
    ) -> Result<Vec<T>, Error>
    where
        T: Mappable + Default + Send + 'static,
    {
        mapper::ensure_validated::<T>()?;
        let handler: Arc<dyn ResultHandler<(), Vec<T>>> = Arc::new(|shard_id, _query, _arg, outcome: RawOutcome| {
            let rows = outcome.result_sets.into_iter().next().unwrap_or_default();
            mapper::models_from_rows::<T>(&rows, shard_id)
        });

        let per_shard = fanout::read_all(&self.shard_map, query, params, shard_param_ordinal, shards_values, handler, Arc::new(()), ct).await?;
        Ok(per_shard.into_iter().flatten().collect())
    }

    /// `Write`: structurally identical to `ReadAll` but dispatches to
    /// each shard's write (primary) connection, and omits shards whose
    /// outcome was empty.
    pub async fn write<T>(
        &self,
        query: &Query,
        params: &Params,
        shard_param_ordinal: Option<usize>,
        shards_values: Option<&ShardsValues>,
        ct: &CancellationToken,
    ) -> Result<Vec<T>, Error>
    where
        T: Mappable + Default + Send + 'static,
    {
        mapper::ensure_validated::<T>()?;
        let query_for_handler = query.clone();
        let handler: Arc<dyn ResultHandler<(), Option<T>>> = Arc::new(move |shard_id, _query, _arg, outcome| {
            if is_empty_outcome(&outcome) {
                return Ok(None);
            }
            assemble::<T>(&query_for_handler, shard_id, outcome).map(Some)
        });

        let per_shard = fanout::write(&self.shard_map, query, params, shard_param_ordinal, shards_values, handler, Arc::new(()), ct).await?;
        Ok(per_shard.into_iter().flatten().collect())
    }

    /// `Batch`: an ordered sequence of statements against every (or
    /// specified) shard's write connection.
    pub async fn batch(
        &self,
        queries: &[(Query, Params)],
        shard_param_ordinal: Option<usize>,
        shards_values: Option<&ShardsValues>,
        ct: &CancellationToken,
    ) -> Result<(), Error> {
        fanout::batch(&self.shard_map, queries, shard_param_ordinal, shards_values, ct).await
    }

    /// List-of-keys helper: lift `key_column` out of
    /// every row across every targeted shard into a [`ShardKey`] stamped
    /// with the shard that produced it.
    pub async fn shard_keys(
        &self,
        query: &Query,
        params: &Params,
        shard_param_ordinal: Option<usize>,
        shards_values: Option<&ShardsValues>,
        key_column: ShardKeyColumn,
        ct: &CancellationToken,
    ) -> Result<Vec<ShardKey>, Error> {
        fanout::read_all_shard_keys(&self.shard_map, query, params, shard_param_ordinal, shards_values, key_column, ct).await
    }

    /// Single-shard read, bypassing the fan-out entirely — the variant
    ///  calls out for callers who already know the target shard
    /// (typically because they hold a [`ShardKey`]).
    pub async fn read_one<T>(&self, shard_id: u16, query: &Query, params: &Params, ct: &CancellationToken) -> Result<Option<T>, Error>
    where
        T: Mappable + Default + Send + 'static,
    {
        mapper::ensure_validated::<T>()?;
        let instance = self.shard_map.get(shard_id).ok_or(Error::UnknownShard(shard_id))?;
        let query_owned = query.clone();
        let handler = move |shard_id: u16, _query: &Query, _arg: &(), outcome: RawOutcome| -> Result<Option<T>, Error> {
            if is_empty_outcome(&outcome) {
                return Ok(None);
            }
            assemble::<T>(&query_owned, shard_id, outcome).map(Some)
        };

        instance.read().query(query, params, &handler, &(), shard_id, ct).await
    }

    /// Single-shard write, bypassing the fan-out entirely.
    pub async fn write_one<T>(&self, shard_id: u16, query: &Query, params: &Params, ct: &CancellationToken) -> Result<Option<T>, Error>
    where
        T: Mappable + Default + Send + 'static,
    {
        mapper::ensure_validated::<T>()?;
        let instance = self.shard_map.get(shard_id).ok_or(Error::UnknownShard(shard_id))?;
        let query_owned = query.clone();
        let handler = move |shard_id: u16, _query: &Query, _arg: &(), outcome: RawOutcome| -> Result<Option<T>, Error> {
            if is_empty_outcome(&outcome) {
                return Ok(None);
            }
            assemble::<T>(&query_owned, shard_id, outcome).map(Some)
        };

        instance.write().query(query, params, &handler, &(), shard_id, ct).await
    }

    /// Unsharded write: a record that carries no shard identity of its
    /// own (e.g. a brand-new record whose key hasn't been assigned yet)
    /// routes to the shard map's configured default shard id rather than
    /// fanning out or requiring the caller to pick one.
    pub async fn write_default<T>(&self, query: &Query, params: &Params, ct: &CancellationToken) -> Result<Option<T>, Error>
    where
        T: Mappable + Default + Send + 'static,
    {
        self.write_one(self.shard_map.default_shard_id(), query, params, ct).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::driver::{Connection, ConnectionFactory, DriverError};
    use async_trait::async_trait;
    use sharddb_config::Config;
    use sharddb_macros::Mappable;
    use sharddb_types::OwnedRow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default, PartialEq, Mappable)]
    struct Customer {
        #[map(param = "Id", column = "id", db_type = "bigint", required)]
        id: i64,
        #[map(param = "Name", column = "name", db_type = "text")]
        name: String,
    }

    struct RowConnection {
        id: i64,
        name: String,
    }

    #[async_trait]
    impl Connection for RowConnection {
        async fn execute(&mut self, _query: &Query, _params: &Params) -> Result<RawOutcome, DriverError> {
            Ok(RawOutcome::single(vec![OwnedRow::new(vec![
                ("id".into(), Value::BigInt(self.id)),
                ("name".into(), Value::Text(self.name.clone())),
            ])]))
        }
    }

    struct RowFactory {
        id: i64,
        name: &'static str,
        opens: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ConnectionFactory for RowFactory {
        async fn connect(
            &self,
            _resolved: &sharddb_config::ResolvedConnection,
        ) -> Result<Box<dyn Connection>, DriverError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(RowConnection {
                id: self.id,
                name: self.name.to_owned(),
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

    #[tokio::test]
    async fn read_all_assembles_one_model_per_shard() {
        let config = two_shard_config();
        let factory = Arc::new(RowFactory {
            id: 7,
            name: "ada",
            opens: Arc::new(AtomicUsize::new(0)),
        });
        let shard_map = ShardMap::build(&config, "customers", factory).unwrap();
        let api = ShardedApi::new(shard_map);
        let ct = CancellationToken::new();

        let customers: Vec<Customer> = api
            .read_all(&Query::new("get_customer", "SELECT id, name"), &Params::new(), None, None, &ct)
            .await
            .unwrap();

        assert_eq!(customers.len(), 2);
        assert!(customers.iter().all(|c| c.id == 7 && c.name == "ada"));
    }

    struct SparseConnection {
        row: Option<(i64, &'static str)>,
    }

    #[async_trait]
    impl Connection for SparseConnection {
        async fn execute(&mut self, _query: &Query, _params: &Params) -> Result<RawOutcome, DriverError> {
            match self.row {
                Some((id, name)) => Ok(RawOutcome::single(vec![OwnedRow::new(vec![
                    ("id".into(), Value::BigInt(id)),
                    ("name".into(), Value::Text(name.to_owned())),
                ])])),
                None => Ok(RawOutcome::default()),
            }
        }
    }

    struct SparseFactory {
        empty_shard_id: u16,
    }

    #[async_trait]
    impl ConnectionFactory for SparseFactory {
        async fn connect(
            &self,
            resolved: &sharddb_config::ResolvedConnection,
        ) -> Result<Box<dyn Connection>, DriverError> {
            let row = if resolved.shard_id == self.empty_shard_id {
                None
            } else {
                Some((7, "ada"))
            };
            Ok(Box::new(SparseConnection { row }))
        }
    }

    #[tokio::test]
    async fn read_all_omits_shards_with_empty_outcome() {
        let config = two_shard_config();
        let shard_map = ShardMap::build(&config, "customers", Arc::new(SparseFactory { empty_shard_id: 2 })).unwrap();
        let api = ShardedApi::new(shard_map);
        let ct = CancellationToken::new();

        let customers: Vec<Customer> = api
            .read_all(&Query::new("get_customer", "SELECT id, name"), &Params::new(), None, None, &ct)
            .await
            .unwrap();

        assert_eq!(customers.len(), 1);
        assert_eq!(customers[0], Customer { id: 7, name: "ada".into() });
    }

    #[tokio::test]
    async fn list_all_flattens_rows_across_shards() {
        let config = two_shard_config();
        let factory = Arc::new(RowFactory {
            id: 3,
            name: "bo",
            opens: Arc::new(AtomicUsize::new(0)),
        });
        let shard_map = ShardMap::build(&config, "customers", factory).unwrap();
        let api = ShardedApi::new(shard_map);
        let ct = CancellationToken::new();

        let customers: Vec<Customer> = api
            .list_all(&Query::new("list_customers", "SELECT id, name"), &Params::new(), None, None, &ct)
            .await
            .unwrap();

        assert_eq!(customers.len(), 2);
    }

    fn two_shard_config_with_default(default_shard_id: u16) -> Config {
        let toml_source = format!(
            r#"
[[shard_sets]]
shard_set_name = "customers"
default_shard_id = {default_shard_id}

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
"#
        );
        toml::from_str(&toml_source).unwrap()
    }

    #[tokio::test]
    async fn write_default_routes_to_the_configured_default_shard() {
        let config = two_shard_config_with_default(2);
        let factory = Arc::new(RowFactory {
            id: 11,
            name: "default-shard",
            opens: Arc::new(AtomicUsize::new(0)),
        });
        let opens = factory.opens.clone();
        let shard_map = ShardMap::build(&config, "customers", factory).unwrap();
        let api = ShardedApi::new(shard_map);
        let ct = CancellationToken::new();

        let customer: Option<Customer> = api
            .write_default(&Query::new("insert_customer", "INSERT INTO customers ..."), &Params::new(), &ct)
            .await
            .unwrap();

        assert_eq!(customer, Some(Customer { id: 11, name: "default-shard".into() }));
        // only the default shard (2) should have been touched, not shard 1.
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn read_one_bypasses_fanout() {
        let config = two_shard_config();
        let factory = Arc::new(RowFactory {
            id: 9,
            name: "cy",
            opens: Arc::new(AtomicUsize::new(0)),
        });
        let opens = factory.opens.clone();
        let shard_map = ShardMap::build(&config, "customers", factory).unwrap();
        let api = ShardedApi::new(shard_map);
        let ct = CancellationToken::new();

        let customer: Option<Customer> = api
            .read_one(1, &Query::new("get_customer", "SELECT id, name"), &Params::new(), &ct)
            .await
            .unwrap();

        assert_eq!(customer, Some(Customer { id: 9, name: "cy".into() }));
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }
}
