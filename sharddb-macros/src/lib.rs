//! `#[derive(Mappable)]`: expands `#[map(...)]`-annotated struct fields
//! into a `sharddb_types::Mappable` implementation.
//!
//! This replaces the reflective, runtime expression-tree builder a
//! managed-runtime implementation would use with a compile-time derive:
//! the decoder for each model type is a monomorphized function generated
//! once, at compile time, instead of a cached closure built on first use.
//!
//! Recognized field attributes (repeatable per field; a field may carry
//! several `#[map(key = ...)]` attributes to describe a composite key):
//!
//! - `#[map(param = "Name", column = "col", db_type = "...", required)]`
//!   — a scalar bound to a write parameter, a read column, or both.
//! - `#[map(out_param = "Name", db_type = "...")]` — a scalar populated
//!   from a named output parameter after the call completes.
//! - `#[map(key = "origin" | "shard_id" | "record" | "child" |
//!   "grandchild" | "great_grandchild", param = "...", column = "...",
//!   db_type = "...", origin = N)]` — one role of a composite
//!   `sharddb_types::ShardKey`-typed field. `origin` is a literal byte
//!   fixing the key space when the model doesn't bind an `origin` role
//!   to its own column/parameter.
//! - `#[map(nested)]` — a nested `Mappable` model flattened into the same
//!   parameter/column space as the outer type.
//! - `#[map(model, result_set = N)]` / `#[map(model_list, result_set = N)]`
//!   — a field populated from result set `N` during multi-result
//!   assembly, as a single row or the whole set.
//!
//! Fields without a `#[map(...)]` attribute are left at their `Default`
//! value, so the target type must derive or implement `Default`.

use std::collections::BTreeMap;

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{parse_macro_input, Data, DeriveInput, Fields, LitInt, LitStr};

#[proc_macro_derive(Mappable, attributes(map))]
pub fn derive_mappable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Clone)]
enum ColumnSpec {
    Name(String),
    Ordinal(u16),
}

/// One `#[map(...)]` attribute instance, parsed but not yet classified.
#[derive(Default, Clone)]
struct RawAttr {
    param: Option<String>,
    column: Option<ColumnSpec>,
    out_param: Option<String>,
    key_role: Option<String>,
    origin: Option<u8>,
    nested: bool,
    model: bool,
    model_list: bool,
    result_set: usize,
    db_type: Option<String>,
    required: bool,
}

fn expand(input: DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;

    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            &input,
            "Mappable can only be derived for structs",
        ));
    };

    let Fields::Named(fields) = &data.fields else {
        return Err(syn::Error::new_spanned(
            &input,
            "Mappable requires named fields",
        ));
    };

    let mut bindings = Vec::new();
    let mut write_param_stmts = Vec::new();
    let mut out_param_placeholder_stmts = Vec::new();
    let mut out_param_arms = Vec::new();
    let mut out_param_ctor_arms = Vec::new();
    let mut result_set_stmts = Vec::new();

    // Shared positional counter: the i-th column-bearing binding here is
    // resolved by the i-th entry `resolve_ordinals` returns, and consumed
    // by the i-th `ordinals[i]` lookup `from_row` emits. Scalar and Key
    // bindings interleave in field-declaration order.
    let mut column_specs: Vec<ColumnSpec> = Vec::new();
    let mut from_row_stmts = Vec::new();

    for field in &fields.named {
        let field_ident = field.ident.as_ref().expect("named field");
        let field_name = field_ident.to_string();

        let raw_attrs = parse_raw_attrs(field)?;
        if raw_attrs.is_empty() {
            continue;
        }

        // Attributes with a `key` role together describe one composite
        // key field; everything else must appear at most once per field.
        // Caught here at compile time since the binding shape is fully
        // known at expansion time.
        let (key_attrs, rest): (Vec<_>, Vec<_>) =
            raw_attrs.into_iter().partition(|a| a.key_role.is_some());

        if rest.len() > 1 {
            return Err(syn::Error::new_spanned(
                field,
                format!("field \"{field_name}\" carries more than one non-key #[map(...)] binding"),
            ));
        }
        if !key_attrs.is_empty() && !rest.is_empty() {
            return Err(syn::Error::new_spanned(
                field,
                format!("field \"{field_name}\" mixes a key binding with a scalar/out_param/nested/model binding"),
            ));
        }

        if !key_attrs.is_empty() {
            emit_key_field(
                field_ident,
                &field_name,
                &key_attrs,
                &mut bindings,
                &mut write_param_stmts,
                &mut column_specs,
                &mut from_row_stmts,
            )?;
            continue;
        }

        let attr = rest.into_iter().next().expect("checked non-empty above");

        if attr.nested {
            let field_ty = &field.ty;
            bindings.push(quote! {
                ::sharddb_types::MapBinding::Nested {
                    field: #field_name,
                    type_id: || ::std::any::TypeId::of::<#field_ty>(),
                    type_name: ::std::any::type_name::<#field_ty>(),
                    bindings: <#field_ty as ::sharddb_types::Mappable>::bindings,
                }
            });
            write_param_stmts.push(quote! {
                ::sharddb_types::Mappable::write_params(&self.#field_ident, params, ambient_shard_id)?;
            });
            from_row_stmts.push(quote! {
                value_out.#field_ident = {
                    let __nested_schema: ::std::vec::Vec<&str> = (0..row.column_count())
                        .map(|__i| row.column_name(__i).unwrap_or(""))
                        .collect();
                    let __nested_ordinals = ::sharddb_types::Mappable::resolve_ordinals(&__nested_schema);
                    ::sharddb_types::Mappable::from_row(row, &__nested_ordinals, shard_id)?
                };
            });
            continue;
        }

        if attr.model || attr.model_list {
            let result_set = attr.result_set;
            let list = attr.model_list;
            bindings.push(quote! {
                ::sharddb_types::MapBinding::ResultSet {
                    field: #field_name,
                    result_set: #result_set,
                    list: #list,
                }
            });
            if list {
                result_set_stmts.push(quote! {
                    if let Some(rows) = result_sets.get(#result_set) {
                        let mut items = ::std::vec::Vec::with_capacity(rows.len());
                        for row in rows {
                            let ordinals = ::sharddb_types::Mappable::resolve_ordinals(
                                &row.columns.iter().map(|(c, _)| c.as_str()).collect::<::std::vec::Vec<_>>(),
                            );
                            items.push(::sharddb_types::Mappable::from_row(row, &ordinals, shard_id)?);
                        }
                        self.#field_ident = items;
                    }
                });
            } else {
                result_set_stmts.push(quote! {
                    if let Some(rows) = result_sets.get(#result_set) {
                        if rows.len() > 1 {
                            return Err(::sharddb_types::Error::InvalidMapping {
                                type_name: stringify!(#name),
                                reason: format!(
                                    "expected at most one row for field \"{}\", got {}",
                                    #field_name,
                                    rows.len()
                                ),
                            });
                        }
                        if let Some(row) = rows.first() {
                            let ordinals = ::sharddb_types::Mappable::resolve_ordinals(
                                &row.columns.iter().map(|(c, _)| c.as_str()).collect::<::std::vec::Vec<_>>(),
                            );
                            self.#field_ident = ::sharddb_types::Mappable::from_row(row, &ordinals, shard_id)?;
                        }
                    }
                });
            }
            continue;
        }

        if let Some(out_name) = &attr.out_param {
            let db_type = db_type_tokens(attr.db_type.as_deref().unwrap_or("text"))?;
            bindings.push(quote! {
                ::sharddb_types::MapBinding::OutParam {
                    field: #field_name,
                    name: #out_name,
                    db_type: #db_type,
                }
            });
            out_param_placeholder_stmts.push(quote! {
                params.ensure_placeholder(#out_name);
            });
            out_param_arms.push(quote! {
                #out_name => {
                    self.#field_ident = ::sharddb_types::FromValue::from_value(value)?;
                    Ok(())
                }
            });
            out_param_ctor_arms.push(quote! {
                if let Some(value) = params.get_by_name(#out_name) {
                    value_out.#field_ident = ::sharddb_types::FromValue::from_value(value)?;
                }
            });
            continue;
        }

        // Plain scalar: a parameter name, a column, or both.
        let param = attr.param.clone();
        let column = attr.column.clone();
        if param.is_none() && column.is_none() {
            return Err(syn::Error::new_spanned(
                field,
                format!(
                    "field \"{field_name}\" needs one of: param, column, out_param, key, nested, model, model_list"
                ),
            ));
        }
        let db_type_ident = attr.db_type.clone().unwrap_or_else(|| "text".to_string());
        let db_type = db_type_tokens(&db_type_ident)?;
        let required = attr.required;

        let column_tokens = match &column {
            Some(ColumnSpec::Name(n)) => quote! { Some(::sharddb_types::ColumnRef::Name(#n)) },
            Some(ColumnSpec::Ordinal(o)) => quote! { Some(::sharddb_types::ColumnRef::Ordinal(#o)) },
            None => quote! { None },
        };
        let param_tokens = match &param {
            Some(p) => quote! { Some(#p) },
            None => quote! { None },
        };
        bindings.push(quote! {
            ::sharddb_types::MapBinding::Scalar {
                field: #field_name,
                parameter: #param_tokens,
                column: #column_tokens,
                db_type: #db_type,
                required: #required,
            }
        });

        if let Some(param_name) = &param {
            write_param_stmts.push(quote! {
                params.auto_append(#param_name, ::sharddb_types::ToValue::to_value(&self.#field_ident));
            });
        }

        if let Some(column) = column {
            let idx = column_specs.len();
            column_specs.push(column);
            if required {
                from_row_stmts.push(quote! {
                    match ordinals.get(#idx).copied().flatten().and_then(|o| row.get_by_ordinal(o)) {
                        Some(value) => value_out.#field_ident = ::sharddb_types::FromValue::from_value(value)?,
                        None => {
                            return Err(::sharddb_types::Error::InvalidMapping {
                                type_name: stringify!(#name),
                                reason: format!("required column for field \"{}\" was missing", #field_name),
                            });
                        }
                    }
                });
            } else {
                from_row_stmts.push(quote! {
                    if let Some(value) = ordinals.get(#idx).copied().flatten().and_then(|o| row.get_by_ordinal(o)) {
                        value_out.#field_ident = ::sharddb_types::FromValue::from_value(value)?;
                    }
                });
            }
        }
    }

    let resolve_ordinals_arms: Vec<TokenStream2> = column_specs
        .iter()
        .map(|spec| match spec {
            ColumnSpec::Name(n) => quote! { schema.iter().position(|c| *c == #n) },
            ColumnSpec::Ordinal(o) => {
                let o = *o as usize;
                quote! { Some(#o) }
            }
        })
        .collect();

    let out_param_apply_body = if out_param_arms.is_empty() {
        quote! { Ok(()) }
    } else {
        quote! {
            match name {
                #(#out_param_arms)*
                _ => Ok(()),
            }
        }
    };

    Ok(quote! {
        impl ::sharddb_types::Mappable for #name {
            fn bindings() -> &'static [::sharddb_types::MapBinding] {
                static BINDINGS: ::std::sync::OnceLock<::std::vec::Vec<::sharddb_types::MapBinding>> =
                    ::std::sync::OnceLock::new();
                BINDINGS.get_or_init(|| ::std::vec![#(#bindings),*])
            }

            fn resolve_ordinals(schema: &[&str]) -> ::std::vec::Vec<::std::option::Option<usize>> {
                ::std::vec![#(#resolve_ordinals_arms),*]
            }

            fn write_params(
                &self,
                params: &mut ::sharddb_types::Params,
                ambient_shard_id: u16,
            ) -> ::std::result::Result<(), ::sharddb_types::Error> {
                #(#write_param_stmts)*
                Ok(())
            }

            fn write_out_param_placeholders(
                params: &mut ::sharddb_types::Params,
            ) -> ::std::result::Result<(), ::sharddb_types::Error> {
                #(#out_param_placeholder_stmts)*
                Ok(())
            }

            fn from_row(
                row: &dyn ::sharddb_types::RowAccess,
                ordinals: &[::std::option::Option<usize>],
                shard_id: u16,
            ) -> ::std::result::Result<Self, ::sharddb_types::Error> {
                let mut value_out = Self::default();
                #(#from_row_stmts)*
                Ok(value_out)
            }

            fn from_out_params(
                params: &::sharddb_types::Params,
                shard_id: u16,
            ) -> ::std::result::Result<Self, ::sharddb_types::Error> {
                let mut value_out = Self::default();
                let _ = shard_id;
                #(#out_param_ctor_arms)*
                Ok(value_out)
            }

            fn apply_out_param(
                &mut self,
                name: &str,
                value: &::sharddb_types::Value,
            ) -> ::std::result::Result<(), ::sharddb_types::Error> {
                #out_param_apply_body
            }

            fn assemble_result_sets(
                &mut self,
                result_sets: &[::std::vec::Vec<::sharddb_types::OwnedRow>],
                shard_id: u16,
            ) -> ::std::result::Result<(), ::sharddb_types::Error> {
                #(#result_set_stmts)*
                Ok(())
            }
        }
    })
}

fn parse_raw_attrs(field: &syn::Field) -> syn::Result<Vec<RawAttr>> {
    let mut out = Vec::new();

    for attr in &field.attrs {
        if !attr.path().is_ident("map") {
            continue;
        }

        let mut raw = RawAttr::default();
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("param") {
                let lit: LitStr = meta.value()?.parse()?;
                raw.param = Some(lit.value());
            } else if meta.path.is_ident("column") {
                let lit: LitStr = meta.value()?.parse()?;
                raw.column = Some(ColumnSpec::Name(lit.value()));
            } else if meta.path.is_ident("ordinal") {
                let lit: LitInt = meta.value()?.parse()?;
                raw.column = Some(ColumnSpec::Ordinal(lit.base10_parse()?));
            } else if meta.path.is_ident("out_param") {
                let lit: LitStr = meta.value()?.parse()?;
                raw.out_param = Some(lit.value());
            } else if meta.path.is_ident("key") {
                let lit: LitStr = meta.value()?.parse()?;
                raw.key_role = Some(lit.value());
            } else if meta.path.is_ident("origin") {
                let lit: LitInt = meta.value()?.parse()?;
                raw.origin = Some(lit.base10_parse()?);
            } else if meta.path.is_ident("nested") {
                raw.nested = true;
            } else if meta.path.is_ident("model") {
                raw.model = true;
            } else if meta.path.is_ident("model_list") {
                raw.model_list = true;
            } else if meta.path.is_ident("result_set") {
                let lit: LitInt = meta.value()?.parse()?;
                raw.result_set = lit.base10_parse()?;
            } else if meta.path.is_ident("db_type") {
                let lit: LitStr = meta.value()?.parse()?;
                raw.db_type = Some(lit.value());
            } else if meta.path.is_ident("required") {
                raw.required = true;
            } else {
                return Err(meta.error("unrecognized #[map(...)] key"));
            }
            Ok(())
        })?;

        out.push(raw);
    }

    Ok(out)
}

#[allow(clippy::too_many_arguments)]
fn emit_key_field(
    field_ident: &syn::Ident,
    field_name: &str,
    key_attrs: &[RawAttr],
    bindings: &mut Vec<TokenStream2>,
    write_param_stmts: &mut Vec<TokenStream2>,
    column_specs: &mut Vec<ColumnSpec>,
    from_row_stmts: &mut Vec<TokenStream2>,
) -> syn::Result<()> {
    let origin_literal = key_attrs.iter().find_map(|a| a.origin);
    let origin_tokens = match origin_literal {
        Some(o) => quote! { Some(#o) },
        None => quote! { None },
    };

    let mut role_read_idents: BTreeMap<&'static str, syn::Ident> = BTreeMap::new();
    let role_names = [
        "origin",
        "shard_id",
        "record",
        "child",
        "grandchild",
        "great_grandchild",
    ];
    for name in role_names {
        role_read_idents.insert(name, format_ident!("__key_{}_{}", field_name, name));
    }

    for attr in key_attrs {
        let role_str = attr.key_role.as_deref().expect("partitioned on key_role");
        let role = key_role_tokens(role_str)?;
        let db_type_ident = attr.db_type.clone().unwrap_or_else(|| "bigint".to_string());
        let db_type = db_type_tokens(&db_type_ident)?;

        let param_tokens = match &attr.param {
            Some(p) => quote! { Some(#p) },
            None => quote! { None },
        };
        let column_tokens = match &attr.column {
            Some(ColumnSpec::Name(n)) => quote! { Some(::sharddb_types::ColumnRef::Name(#n)) },
            Some(ColumnSpec::Ordinal(o)) => quote! { Some(::sharddb_types::ColumnRef::Ordinal(#o)) },
            None => quote! { None },
        };

        bindings.push(quote! {
            ::sharddb_types::MapBinding::Key {
                field: #field_name,
                role: #role,
                parameter: #param_tokens,
                column: #column_tokens,
                db_type: #db_type,
                origin: #origin_tokens,
            }
        });

        if let Some(param_name) = &attr.param {
            let write_expr = key_component_write_expr(field_ident, role_str);
            write_param_stmts.push(quote! {
                if let Some(component) = #write_expr {
                    params.auto_append(#param_name, component.to_value(#db_type));
                } else {
                    params.auto_append(#param_name, ::sharddb_types::Value::Null);
                }
            });
        }

        if let Some(column) = attr.column.clone() {
            let idx = column_specs.len();
            column_specs.push(column);
            let read_ident = &role_read_idents[role_str];
            from_row_stmts.push(quote! {
                let #read_ident = ordinals
                    .get(#idx)
                    .copied()
                    .flatten()
                    .and_then(|o| row.get_by_ordinal(o))
                    .and_then(::sharddb_types::KeyComponent::from_value);
            });
        } else {
            let read_ident = &role_read_idents[role_str];
            from_row_stmts.push(quote! {
                let #read_ident: ::std::option::Option<::sharddb_types::KeyComponent> = None;
            });
        }
    }

    for name in role_names {
        if !key_attrs.iter().any(|a| a.key_role.as_deref() == Some(name)) {
            let read_ident = &role_read_idents[name];
            from_row_stmts.push(quote! {
                let #read_ident: ::std::option::Option<::sharddb_types::KeyComponent> = None;
            });
        }
    }

    let origin_ident = &role_read_idents["origin"];
    let shard_id_ident = &role_read_idents["shard_id"];
    let record_ident = &role_read_idents["record"];
    let child_ident = &role_read_idents["child"];
    let grandchild_ident = &role_read_idents["grandchild"];
    let great_grandchild_ident = &role_read_idents["great_grandchild"];

    from_row_stmts.push(quote! {
        value_out.#field_ident = ::sharddb_types::ShardKey::from_components(
            #origin_ident.as_ref().and_then(|c| match c {
                ::sharddb_types::KeyComponent::Int(v) => ::std::primitive::u8::try_from(*v).ok(),
                _ => None,
            }).or(#origin_tokens),
            #shard_id_ident.as_ref().and_then(|c| match c {
                ::sharddb_types::KeyComponent::Int(v) => ::std::primitive::u16::try_from(*v).ok(),
                _ => None,
            }).unwrap_or(shard_id),
            #record_ident,
            #child_ident,
            #grandchild_ident,
            #great_grandchild_ident,
        );
    });

    Ok(())
}

/// Build the expression that produces `Option<KeyComponent>` for `role`
/// out of `self.<field>`, a `ShardKey`, when writing parameters.
fn key_component_write_expr(field_ident: &syn::Ident, role: &str) -> TokenStream2 {
    match role {
        "origin" => quote! { self.#field_ident.origin().map(|o| ::sharddb_types::KeyComponent::Int(o as i64)) },
        "shard_id" => {
            quote! { self.#field_ident.shard_id().map(|s| ::sharddb_types::KeyComponent::Int(s as i64)) }
        }
        "record" => quote! { self.#field_ident.record().cloned() },
        "child" => quote! { self.#field_ident.child().cloned() },
        "grandchild" => quote! { self.#field_ident.grandchild().cloned() },
        "great_grandchild" => quote! { self.#field_ident.great_grandchild().cloned() },
        _ => quote! { ::std::option::Option::None },
    }
}

fn db_type_tokens(ident: &str) -> syn::Result<TokenStream2> {
    let variant = match ident {
        "boolean" => quote! { Boolean },
        "smallint" => quote! { SmallInt },
        "int" => quote! { Int },
        "bigint" => quote! { BigInt },
        "real" => quote! { Real },
        "double" => quote! { Double },
        "decimal" => quote! { Decimal },
        "text" => quote! { Text },
        "uuid" => quote! { Uuid },
        "timestamp" => quote! { Timestamp },
        "timestamptz" => quote! { TimestampTz },
        "binary" => quote! { Binary },
        other => {
            return Err(syn::Error::new(
                proc_macro2::Span::call_site(),
                format!("unknown db_type \"{other}\""),
            ));
        }
    };
    Ok(quote! { ::sharddb_types::DbType::#variant })
}

fn key_role_tokens(role: &str) -> syn::Result<TokenStream2> {
    let variant = match role {
        "origin" => quote! { Origin },
        "shard_id" => quote! { ShardId },
        "record" => quote! { Record },
        "child" => quote! { Child },
        "grandchild" => quote! { Grandchild },
        "great_grandchild" => quote! { GreatGrandchild },
        other => {
            return Err(syn::Error::new(
                proc_macro2::Span::call_site(),
                format!("unknown key role \"{other}\""),
            ));
        }
    };
    Ok(quote! { ::sharddb_types::KeyRole::#variant })
}
