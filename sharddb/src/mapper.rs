//! The code-gen mapper cache.
//!
//! `#[derive(Mappable)]` already emits the per-type read/write functions
//! at compile time (Design Note 9: "runtime code generation → compile-time
//! generics"), so this module's job shrinks to what's left that's
//! genuinely dynamic: validating a type's binding set once, on first use,
//! and assembling a root model out of the result sets/out-params a
//! procedure call actually returned.

use std::any::TypeId;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use sharddb_types::{KeyRole, MapBinding, Mappable, OwnedRow, Params};

use crate::Error;

static VALIDATED: Lazy<DashMap<TypeId, Arc<OnceCell<Result<(), ValidationFailure>>>>> =
    Lazy::new(DashMap::new);

/// A validation failure, kept `Clone` so the single-flight cell can hand
/// the same outcome to every caller without cloning a boxed driver error
/// (the crate's public [`Error`] deliberately isn't `Clone`).
#[derive(Debug, Clone)]
enum ValidationFailure {
    NoMappingAttributesFound(&'static str),
    MissingKeyRole { type_name: &'static str, role: KeyRole },
    CyclicModel(&'static str),
}

impl From<ValidationFailure> for Error {
    fn from(failure: ValidationFailure) -> Self {
        match failure {
            ValidationFailure::NoMappingAttributesFound(t) => Error::NoMappingAttributesFound(t),
            ValidationFailure::MissingKeyRole { type_name, role } => {
                Error::MissingKeyRole { type_name, role }
            }
            ValidationFailure::CyclicModel(t) => Error::CyclicModel(t),
        }
    }
}

/// Validate `T`'s binding set, once per type for the process lifetime.
///
/// Concurrent first callers on the same type observe the same build: the
/// `DashMap` entry is created once, then every caller awaits the same
/// `OnceCell`.
pub fn ensure_validated<T: Mappable + 'static>() -> Result<(), Error> {
    let type_id = TypeId::of::<T>();
    let cell = VALIDATED
        .entry(type_id)
        .or_insert_with(|| Arc::new(OnceCell::new()))
        .clone();

    cell.get_or_init(|| {
        let type_name = std::any::type_name::<T>();
        let mut stack = Vec::new();
        validate_bindings(type_name, T::bindings(), &mut stack, type_id)
    })
    .clone()
    .map_err(Error::from)
}

/// Walk a binding set, checking completeness and recursing into nested
/// models while tracking the "in progress" type set (Design Note 9's
/// `Vec<TypeId>` cycle guard).
fn validate_bindings(
    type_name: &'static str,
    bindings: &'static [MapBinding],
    stack: &mut Vec<TypeId>,
    type_id: TypeId,
) -> Result<(), ValidationFailure> {
    if bindings.is_empty() {
        return Err(ValidationFailure::NoMappingAttributesFound(type_name));
    }

    if stack.contains(&type_id) {
        return Err(ValidationFailure::CyclicModel(type_name));
    }
    stack.push(type_id);

    check_key_completeness(type_name, bindings)?;

    for binding in bindings {
        if let MapBinding::Nested {
            type_id: nested_type_id,
            type_name: nested_name,
            bindings: nested_bindings,
            ..
        } = binding
        {
            validate_bindings(nested_name, nested_bindings(), stack, nested_type_id())?;
        }
    }

    stack.pop();
    Ok(())
}

/// Every `Key`-role group sharing a field name must supply `record`, and
/// each optional role below it in the hierarchy only if the role above it
/// is present.
fn check_key_completeness(
    type_name: &'static str,
    bindings: &'static [MapBinding],
) -> Result<(), ValidationFailure> {
    let mut fields: Vec<&'static str> = Vec::new();
    for binding in bindings {
        if let MapBinding::Key { field, .. } = binding {
            if !fields.contains(field) {
                fields.push(field);
            }
        }
    }

    for field in fields {
        let roles: Vec<KeyRole> = bindings
            .iter()
            .filter_map(|b| match b {
                MapBinding::Key { field: f, role, .. } if *f == field => Some(*role),
                _ => None,
            })
            .collect();

        if !roles.contains(&KeyRole::Record) {
            return Err(ValidationFailure::MissingKeyRole {
                type_name,
                role: KeyRole::Record,
            });
        }
        if roles.contains(&KeyRole::Grandchild) && !roles.contains(&KeyRole::Child) {
            return Err(ValidationFailure::MissingKeyRole {
                type_name,
                role: KeyRole::Child,
            });
        }
        if roles.contains(&KeyRole::GreatGrandchild) && !roles.contains(&KeyRole::Grandchild) {
            return Err(ValidationFailure::MissingKeyRole {
                type_name,
                role: KeyRole::Grandchild,
            });
        }
    }

    Ok(())
}

/// Whether `T` describes a container of result sets/out-params (a root
/// model distinct from any row type) rather than a row shape of its own.
fn is_container(bindings: &'static [MapBinding]) -> bool {
    bindings
        .iter()
        .any(|b| matches!(b, MapBinding::ResultSet { .. } | MapBinding::OutParam { .. }))
}

/// `ModelFromResults`: assemble a `T` from whatever result
/// sets and output parameters a procedure call returned.
///
/// Root selection collapses to a static check on `T::bindings()` rather
/// than the source's runtime type-equality test, because the generic
/// parameter `T` already *is* the compile-time choice of root a caller
/// made: a type whose own bindings
/// describe `ResultSet`/`OutParam` fields is the container the source
/// calls "the output-param model"; a type with only `Scalar`/`Key`
/// bindings is itself a row shape, lifted directly from the first result
/// set (step 1's "equals one of the row-list element types" case).
pub fn assemble_model_from_results<T: Mappable + Default + 'static>(
    procedure: &str,
    result_sets: &[Vec<OwnedRow>],
    out_params: &Params,
    shard_id: u16,
) -> Result<T, Error> {
    ensure_validated::<T>()?;

    let mut model = if is_container(T::bindings()) {
        let mut model = T::default();
        model.assemble_result_sets(result_sets, shard_id)?;
        model
    } else {
        match result_sets.first().map(Vec::as_slice) {
            None | Some([]) => T::default(),
            Some(rows) if rows.len() > 1 => {
                return Err(Error::UnexpectedMultiRow {
                    type_name: std::any::type_name::<T>(),
                    procedure: procedure.to_owned(),
                    count: rows.len(),
                });
            }
            Some(rows) => {
                let row = &rows[0];
                let schema: Vec<&str> = row.columns.iter().map(|(name, _)| name.as_str()).collect();
                let ordinals = T::resolve_ordinals(&schema);
                T::from_row(row, &ordinals, shard_id)?
            }
        }
    };

    for (name, value) in out_params.iter() {
        model.apply_out_param(name, value)?;
    }

    Ok(model)
}

/// `read_out` cache line: a model built purely from named
/// output parameters, with no row data at all.
pub fn model_from_out_params<T: Mappable + 'static>(params: &Params, shard_id: u16) -> Result<T, Error> {
    ensure_validated::<T>()?;
    T::from_out_params(params, shard_id)
}

/// `read_row` cache line: decode every row in a single result
/// set, resolving the ordinal table once and reusing it for every row.
pub fn models_from_rows<T: Mappable + 'static>(rows: &[OwnedRow], shard_id: u16) -> Result<Vec<T>, Error> {
    ensure_validated::<T>()?;
    let mut out = Vec::with_capacity(rows.len());
    if rows.is_empty() {
        return Ok(out);
    }
    let schema: Vec<&str> = rows[0].columns.iter().map(|(name, _)| name.as_str()).collect();
    let ordinals = T::resolve_ordinals(&schema);
    for row in rows {
        out.push(T::from_row(row, &ordinals, shard_id)?);
    }
    Ok(out)
}

/// `in_params`/`out_params` cache lines: write a model's bound
/// fields into `params`, and register every out-param placeholder it
/// declares.
pub fn write_params<T: Mappable + 'static>(model: &T, params: &mut Params, ambient_shard_id: u16) -> Result<(), Error> {
    ensure_validated::<T>()?;
    model.write_params(params, ambient_shard_id)?;
    T::write_out_param_placeholders(params)?;
    Ok(())
}
