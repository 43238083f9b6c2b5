//! Table models: what to import, and what was read

use serde::{Deserialize, Serialize};

use super::column::ColumnDef;
use super::value::Value;

/// One row, ordered like the columns of the table it was read from
pub type Row = Vec<Value>;

/// A logical unit of import
///
/// Built from configuration; the column set is only known once the source
/// has been read, so a spec carries the table name alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table name, identical in source and destination
    pub name: String,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Build specs from configured names, dropping blanks and repeats while
    /// keeping the configured order
    pub fn from_names<I, S>(names: I) -> Vec<TableSpec>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut specs: Vec<TableSpec> = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() || specs.iter().any(|s| s.name == name) {
                continue;
            }
            specs.push(TableSpec::new(name));
        }
        specs
    }
}

impl std::fmt::Display for TableSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Structure and contents of one source table, held in memory for one pass
#[derive(Debug, Clone, PartialEq)]
pub struct TableData {
    /// Table name
    pub name: String,
    /// Column definitions in source order
    pub columns: Vec<ColumnDef>,
    /// All rows, each ordered like `columns`
    pub rows: Vec<Row>,
}

impl TableData {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>, rows: Vec<Row>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows,
        }
    }

    /// Position of a column by name
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}
