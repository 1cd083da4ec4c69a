//! The parameter abstraction: an ordered, named collection of
//! typed values passed to a shard-set operation.
//!
//! Lives in `sharddb-types` so that proc-macro-generated `Mappable` impls
//! (which run in whatever crate derives them) and the fan-out engine in
//! `sharddb` share one definition. A `Params` collection is shared across
//! every task a fan-out spawns (§5, Design Note 9: "mutable parameter
//! collection across tasks"); it is kept cheaply `Clone`-able (a small
//! vector of tagged [`crate::Value`]s) so each task clones its own copy
//! rather than contending on a shared mutable collection.

use crate::{Error, ToValue, Value};

#[derive(Debug, Clone, PartialEq)]
struct ParamEntry {
    name: String,
    value: Value,
    /// Set once a caller (or the mapper's own auto-mapping pass) has
    /// supplied this value, so a later auto-mapping pass never silently
    /// overwrites a value someone already committed.
    explicit: bool,
}

/// An ordered, named collection of parameter values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: Vec<ParamEntry>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter by name. Names must be unique within a
    /// collection; `append` after a name has already been used raises
    /// [`Error::InvalidMapping`].
    pub fn append(&mut self, name: impl Into<String>, value: impl ToValue) -> Result<(), Error> {
        let name = name.into();
        if self.entries.iter().any(|e| e.name == name) {
            return Err(Error::InvalidMapping {
                type_name: "Params",
                reason: format!("parameter \"{name}\" already set"),
            });
        }
        self.entries.push(ParamEntry {
            name,
            value: value.to_value(),
            explicit: true,
        });
        Ok(())
    }

    /// Append a parameter populated by the mapper cache's auto-mapping
    /// pass; unlike [`Params::append`], this never marks the entry
    /// `explicit`, so a later caller override still wins if applied
    /// through `append`/`ignore` before dispatch.
    pub fn append_mapped(&mut self, name: impl Into<String>, value: Value) {
        self.entries.push(ParamEntry {
            name: name.into(),
            value,
            explicit: false,
        });
    }

    /// Write `value` under `name`, unless the caller already set this
    /// parameter explicitly (the "ignore set" of ): a generated
    /// `Mappable::write_params` calls this for every bound field so the
    /// caller's own `append` always wins over a value derived from a
    /// model field.
    pub fn auto_append(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if self.is_explicit(&name) {
            return;
        }
        if let Some(entry) = self.entries.iter_mut().find(|e| e.name == name) {
            entry.value = value;
        } else {
            self.entries.push(ParamEntry {
                name,
                value,
                explicit: false,
            });
        }
    }

    /// Register a named output-parameter placeholder if it isn't already
    /// present. Used by `Mappable::write_out_param_placeholders`.
    pub fn ensure_placeholder(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.entries.iter().any(|e| e.name == name) {
            self.entries.push(ParamEntry {
                name,
                value: Value::Null,
                explicit: false,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|e| e.name == name).map(|e| &e.value)
    }

    pub fn get_by_ordinal(&self, ordinal: usize) -> Option<&Value> {
        self.entries.get(ordinal).map(|e| &e.value)
    }

    pub fn name_at(&self, ordinal: usize) -> Option<&str> {
        self.entries.get(ordinal).map(|e| e.name.as_str())
    }

    /// Whether the mapper cache is still allowed to overwrite this
    /// parameter during auto-mapping.
    pub fn is_explicit(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name && e.explicit)
    }

    /// Force `name` to `value` regardless of any prior explicit setting,
    /// appending it if absent. Used by the shard-set fan-out engine to
    /// apply a caller's per-shard parameter overrides, which must win
    /// even over a value the caller already set on the shared template.
    pub fn force_set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        if let Some(entry) = self.entries.iter_mut().find(|e| e.name == name) {
            entry.value = value;
            entry.explicit = true;
        } else {
            self.entries.push(ParamEntry {
                name,
                value,
                explicit: true,
            });
        }
    }

    /// Overwrite the value at `ordinal` with `shard_id` and mark it
    /// explicit, so the fan-out can stamp the target shard id into a
    /// pre-built parameter collection before cloning it per shard.
    pub fn set_shard_id(&mut self, ordinal: usize, shard_id: u16) -> Result<(), Error> {
        let entry = self
            .entries
            .get_mut(ordinal)
            .ok_or_else(|| Error::InvalidMapping {
                type_name: "Params",
                reason: format!("no parameter at ordinal {ordinal}"),
            })?;
        entry.value = Value::Int(shard_id as i32);
        entry.explicit = true;
        Ok(())
    }

    /// Mark an already-appended parameter as no longer eligible for
    /// auto-mapping overwrite, without changing its value.
    pub fn ignore(&mut self, name: &str) -> Result<(), Error> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| Error::InvalidMapping {
                type_name: "Params",
                reason: format!("no parameter named \"{name}\""),
            })?;
        entry.explicit = true;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|e| (e.name.as_str(), &e.value))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_duplicate_names() {
        let mut params = Params::new();
        params.append("id", 1i64).unwrap();
        assert!(params.append("id", 2i64).is_err());
    }

    #[test]
    fn set_shard_id_stamps_ordinal() {
        let mut params = Params::new();
        params.append("shard_id", 0i64).unwrap();
        params.set_shard_id(0, 7).unwrap();
        assert_eq!(params.get_by_ordinal(0), Some(&Value::Int(7)));
    }

    #[test]
    fn explicit_values_win_over_auto_append() {
        let mut params = Params::new();
        params.append("name", "caller-value").unwrap();
        params.auto_append("name", Value::Text("mapper-value".into()));
        assert_eq!(
            params.get_by_name("name"),
            Some(&Value::Text("caller-value".into()))
        );
    }

    #[test]
    fn auto_append_fills_unset_value() {
        let mut params = Params::new();
        params.auto_append("name", Value::Text("auto".into()));
        assert_eq!(params.get_by_name("name"), Some(&Value::Text("auto".into())));
        assert!(!params.is_explicit("name"));
    }
}
