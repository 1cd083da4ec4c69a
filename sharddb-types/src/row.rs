use crate::Value;

/// A single row of a driver result set, addressable by column name or
/// ordinal.
///
/// Implemented by whatever the connection manager's driver produces;
/// `sharddb-types` only needs read access to the tagged values, never the
/// wire format they came from.
pub trait RowAccess {
    fn get_by_name(&self, name: &str) -> Option<&Value>;
    fn get_by_ordinal(&self, ordinal: usize) -> Option<&Value>;
    fn column_count(&self) -> usize;

    /// Column name at `ordinal`, when the row knows one.
    ///
    /// A nested `Mappable` field resolves its own column
    /// bindings against this rather than the outer schema array, since a
    /// `from_row` call only carries an already-resolved ordinal table for
    /// its own type, not the raw schema the outer type was built against.
    fn column_name(&self, _ordinal: usize) -> Option<&str> {
        None
    }
}

/// An owned, in-memory row. Used by tests and by drivers that materialize
/// a full result set before handing rows to the mapper.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OwnedRow {
    pub columns: Vec<(String, Value)>,
}

impl OwnedRow {
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }
}

impl RowAccess for OwnedRow {
    fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(col, _)| col == name)
            .map(|(_, value)| value)
    }

    fn get_by_ordinal(&self, ordinal: usize) -> Option<&Value> {
        self.columns.get(ordinal).map(|(_, value)| value)
    }

    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_name(&self, ordinal: usize) -> Option<&str> {
        self.columns.get(ordinal).map(|(name, _)| name.as_str())
    }
}
