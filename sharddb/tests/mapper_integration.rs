//! Black-box coverage for the multi-result assembly algorithm
//! (`ModelFromResults`) against the derive macro's generated `Mappable`
//! impls, plus the composite-key round trip through a real `#[map(key =
//! ...)]` field rather than `ShardKey`'s own unit tests. Lives in `tests/`
//! rather than a `#[cfg(test)]` module because it exercises the crate's
//! public surface end to end, matching the teacher's own `pgdog/tests/`
//! convention for behavior that crosses several modules.

use sharddb::mapper;
use sharddb_macros::Mappable;
use sharddb_types::Mappable as _;
use sharddb_types::{OwnedRow, Params, ShardKey, Value};

#[derive(Debug, Default, PartialEq, Mappable)]
struct OrderItem {
    #[map(column = "sku", db_type = "text", required)]
    sku: String,
    #[map(column = "qty", db_type = "int", required)]
    qty: i32,
}

/// A container model: populated from out-parameters *and* a result set,
/// the shape spec.md §4.D's testable scenario 5 describes ("out-params +
/// single-row result ... assembled model has both list and scalar fields
/// populated").
#[derive(Debug, Default, PartialEq, Mappable)]
struct OrderSummary {
    #[map(out_param = "OrderId", db_type = "bigint")]
    order_id: i64,
    #[map(out_param = "Total", db_type = "double")]
    total: f64,
    #[map(model_list, result_set = 0)]
    items: Vec<OrderItem>,
}

#[derive(Debug, Default, PartialEq, Mappable)]
struct SingleRowOrder {
    #[map(param = "Id", column = "id", db_type = "bigint", required)]
    id: i64,
    #[map(param = "Name", column = "name", db_type = "text")]
    name: String,
}

#[derive(Debug, Default, PartialEq, Mappable)]
struct Account {
    #[map(key = "shard_id")]
    #[map(key = "record", param = "RecordId", column = "record_id", db_type = "bigint", origin = 65)]
    #[map(key = "child", param = "ChildId", column = "child_id", db_type = "bigint")]
    key: ShardKey,
    #[map(param = "Name", column = "name", db_type = "text")]
    name: String,
}

fn item_row(sku: &str, qty: i32) -> OwnedRow {
    OwnedRow::new(vec![
        ("sku".into(), Value::Text(sku.into())),
        ("qty".into(), Value::Int(qty)),
    ])
}

#[test]
fn assembles_list_field_and_out_param_scalars_together() {
    let result_sets = vec![vec![item_row("widget", 3), item_row("gadget", 1)]];
    let mut out_params = Params::new();
    out_params.append("OrderId", 7i64).unwrap();
    out_params.append("Total", 19.98f64).unwrap();

    let summary: OrderSummary =
        mapper::assemble_model_from_results("get_order", &result_sets, &out_params, 0).unwrap();

    assert_eq!(summary.order_id, 7);
    assert_eq!(summary.total, 19.98);
    assert_eq!(
        summary.items,
        vec![
            OrderItem { sku: "widget".into(), qty: 3 },
            OrderItem { sku: "gadget".into(), qty: 1 },
        ]
    );
}

#[test]
fn container_with_no_rows_leaves_list_field_empty() {
    let result_sets: Vec<Vec<OwnedRow>> = vec![vec![]];
    let mut out_params = Params::new();
    out_params.append("OrderId", 3i64).unwrap();
    out_params.append("Total", 0.0f64).unwrap();

    let summary: OrderSummary =
        mapper::assemble_model_from_results("get_order", &result_sets, &out_params, 0).unwrap();

    assert_eq!(summary.order_id, 3);
    assert!(summary.items.is_empty());
}

#[test]
fn single_row_lifts_directly_into_a_row_shaped_model() {
    let result_sets = vec![vec![OwnedRow::new(vec![
        ("id".into(), Value::BigInt(42)),
        ("name".into(), Value::Text("alice".into())),
    ])]];

    let order: SingleRowOrder =
        mapper::assemble_model_from_results("get_one", &result_sets, &Params::new(), 0).unwrap();

    assert_eq!(order, SingleRowOrder { id: 42, name: "alice".into() });
}

#[test]
fn multiple_rows_against_a_row_shaped_model_is_rejected() {
    let result_sets = vec![vec![
        OwnedRow::new(vec![("id".into(), Value::BigInt(1)), ("name".into(), Value::Text("a".into()))]),
        OwnedRow::new(vec![("id".into(), Value::BigInt(2)), ("name".into(), Value::Text("b".into()))]),
    ]];

    let err = mapper::assemble_model_from_results::<SingleRowOrder>("get_one", &result_sets, &Params::new(), 0)
        .unwrap_err();

    assert!(matches!(
        err,
        sharddb::Error::UnexpectedMultiRow { count: 2, .. }
    ));
}

#[test]
fn composite_key_field_round_trips_through_write_and_read() {
    let account = Account {
        key: ShardKey::new(b'A', 9, 100).with_child(5),
        name: "acme".into(),
    };

    let mut params = Params::new();
    account.write_params(&mut params, 9).unwrap();
    assert_eq!(params.get_by_name("RecordId"), Some(&Value::BigInt(100)));
    assert_eq!(params.get_by_name("ChildId"), Some(&Value::BigInt(5)));

    let row = OwnedRow::new(vec![
        ("record_id".into(), Value::BigInt(100)),
        ("child_id".into(), Value::BigInt(5)),
        ("name".into(), Value::Text("acme".into())),
    ]);
    let schema: Vec<&str> = row.columns.iter().map(|(n, _)| n.as_str()).collect();
    let ordinals = Account::resolve_ordinals(&schema);
    let decoded = Account::from_row(&row, &ordinals, 9).unwrap();

    assert_eq!(decoded.key, ShardKey::new(b'A', 9, 100).with_child(5));
    assert_eq!(decoded.name, "acme");
}

#[test]
fn incomplete_key_on_write_decodes_back_to_empty() {
    let account = Account {
        key: ShardKey::empty(),
        name: "nobody".into(),
    };

    let mut params = Params::new();
    account.write_params(&mut params, 0).unwrap();
    assert_eq!(params.get_by_name("RecordId"), Some(&Value::Null));
    assert_eq!(params.get_by_name("ChildId"), Some(&Value::Null));
}
