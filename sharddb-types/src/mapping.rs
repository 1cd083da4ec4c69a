//! Declarative field bindings and the [`Mappable`] trait that
//! `#[derive(Mappable)]` (in `sharddb-macros`) implements from them.
//!
//! The source builds a per-type expression tree the first time a model is
//! used; this port replaces that with a compile-time derive that emits a
//! monomorphized implementation directly (Design Note 9, "runtime code
//! generation → compile-time generics"). `bindings()` stays as pure
//! metadata so the mapper cache in `sharddb` can still validate a type's
//! binding set (completeness, no duplicates) the first time it is used,
//! exactly as the source's lazy builder does — the validation is just
//! over a `&'static [MapBinding]` slice instead of a reflected field list.

use crate::{DbType, Error, OwnedRow, Params, RowAccess, Value};

/// Which part of a composite key a field's binding occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyRole {
    Origin,
    ShardId,
    Record,
    Child,
    Grandchild,
    GreatGrandchild,
}

/// Where a scalar field's value comes from when reading a row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnRef {
    Name(&'static str),
    Ordinal(u16),
}

/// One field's declarative binding, as produced by `#[derive(Mappable)]`
/// from its `#[map(...)]` attribute(s).
///
/// `Mappable::bindings()` returns the full set for a type; the mapper
/// cache in `sharddb` validates the set (completeness, no duplicates)
/// once at build time and never again.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MapBinding {
    /// A plain value: a parameter name for writing, a column for reading,
    /// or both —  scalar binding is exactly this pair plus a
    /// type and a required flag.
    Scalar {
        field: &'static str,
        parameter: Option<&'static str>,
        column: Option<ColumnRef>,
        db_type: DbType,
        required: bool,
    },
    /// A named output parameter populated after the call completes.
    OutParam {
        field: &'static str,
        name: &'static str,
        db_type: DbType,
    },
    /// One component of a composite key bound to this field. Several
    /// `Key` bindings sharing the same `field` together describe one
    /// composite-key field's roles.
    Key {
        field: &'static str,
        role: KeyRole,
        parameter: Option<&'static str>,
        column: Option<ColumnRef>,
        db_type: DbType,
        /// The origin byte for this key space, when fixed at the type
        /// level rather than bound to a column/parameter of its own.
        origin: Option<u8>,
    },
    /// A nested `Mappable` model recursively flattened into the same
    /// parameter/column space as the outer type.
    ///
    /// Carries the nested type's identity and its own `bindings()` so the
    /// mapper cache can walk the nested-model graph (completeness and
    /// cycle checks) without the outer type needing to name the nested
    /// type in its own signature.
    Nested {
        field: &'static str,
        type_id: fn() -> std::any::TypeId,
        type_name: &'static str,
        bindings: fn() -> &'static [MapBinding],
    },
    /// A field populated from one of up to eight result sets during
    /// multi-result assembly: either a
    /// single row (`list: false`) or the whole result set (`list: true`).
    ResultSet {
        field: &'static str,
        result_set: usize,
        list: bool,
    },
}

impl MapBinding {
    pub fn field(&self) -> &'static str {
        match self {
            Self::Scalar { field, .. }
            | Self::OutParam { field, .. }
            | Self::Key { field, .. }
            | Self::Nested { field, .. }
            | Self::ResultSet { field, .. } => field,
        }
    }
}

/// A type whose fields have been declared with `#[derive(Mappable)]`.
///
/// Every method here is generated mechanically from `#[map(...)]`
/// attributes; none of them validate the binding set (that happens once,
/// in `sharddb`'s mapper cache, against `bindings()`). A type with no
/// `#[map(...)]` attributes at all gets every method's default
/// trivial/no-op body, which the mapper cache turns into
/// `NoMappingAttributesFound` by inspecting `bindings()` being empty.
pub trait Mappable: Sized + Default {
    /// Declarative metadata for every annotated field, in declaration
    /// order. Pure data: never touches a row or parameter collection.
    fn bindings() -> &'static [MapBinding] {
        &[]
    }

    /// Resolve every column-bearing binding's name/ordinal against a
    /// result set's schema, once per result set. The returned table is
    /// positional: entry `i` corresponds to the `i`-th column-bearing
    /// binding in `bindings()` order (`Scalar`/`Key` entries that carry a
    /// `column`). [`Mappable::from_row`] consumes this table so a whole
    /// result set only pays the by-name lookup cost once.
    fn resolve_ordinals(_schema: &[&str]) -> Vec<Option<usize>> {
        Vec::new()
    }

    /// Append this model's bound fields into `params`, via
    /// [`Params::auto_append`] so an explicit caller value always wins.
    /// `ambient_shard_id` fills the `ShardId` key role when a composite
    /// key field's own shard id is absent (the key is `empty`, or the
    /// role carries no binding of its own).
    fn write_params(&self, _params: &mut Params, _ambient_shard_id: u16) -> Result<(), Error> {
        Ok(())
    }

    /// Register every `OutParam` binding's placeholder before the call
    /// executes, so the driver knows to reserve space for it.
    fn write_out_param_placeholders(_params: &mut Params) -> Result<(), Error> {
        Ok(())
    }

    /// Decode one row into a new `Self`, using a table built once by
    /// [`Mappable::resolve_ordinals`] for this row's result set.
    fn from_row(_row: &dyn RowAccess, _ordinals: &[Option<usize>], _shard_id: u16) -> Result<Self, Error> {
        Ok(Self::default())
    }

    /// Build a `Self` purely from named output parameters, after the call has completed.
    fn from_out_params(_params: &Params, _shard_id: u16) -> Result<Self, Error> {
        Ok(Self::default())
    }

    /// Apply one named output parameter onto an existing instance. Used
    /// by [`Mappable::assemble_result_sets`] to merge out-params into a
    /// model already partially populated from row data.
    fn apply_out_param(&mut self, _name: &str, _value: &Value) -> Result<(), Error> {
        Ok(())
    }

    /// §4.D `ModelFromResults`: populate every `ResultSet`-bound field
    /// from the corresponding entry of `result_sets` (by index). Types
    /// with no such bindings get the default no-op; the mapper cache in
    /// `sharddb` chooses the root instance and merges out-params
    /// separately via [`Mappable::apply_out_param`].
    fn assemble_result_sets(&mut self, _result_sets: &[Vec<OwnedRow>], _shard_id: u16) -> Result<(), Error> {
        Ok(())
    }
}
