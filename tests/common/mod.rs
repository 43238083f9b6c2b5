//! Shared helpers for integration tests
//!
//! `MemoryDestination` is an in-memory `DestinationWriter` that behaves like
//! the PostgreSQL destination where the import engine can observe it: tables
//! are created with a unique dedup key, inserts are all-or-nothing and a lost
//! connection fails every later call.

#![allow(dead_code)]

use async_trait::async_trait;
use health_data_importer::database::{DatabaseError, DatabaseResult, DestinationWriter, TableDef};
use health_data_importer::{ColumnDef, KeyValue, Row, Value};
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// One destination table
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<Row>,
    /// Column carrying a unique index, if any
    pub unique_key: Option<String>,
}

impl MemoryTable {
    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, MemoryTable>,
    fail_inserts: HashSet<String>,
    lose_connection_on: Option<String>,
    connection_lost: bool,
    ddl: Vec<String>,
    insert_batches: usize,
}

/// In-memory destination; clones share the same state
#[derive(Debug, Clone, Default)]
pub struct MemoryDestination {
    state: Arc<Mutex<State>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a pre-existing table without a unique index
    pub fn with_table(self, name: &str, columns: Vec<ColumnDef>, rows: Vec<Row>) -> Self {
        self.state.lock().unwrap().tables.insert(
            name.to_string(),
            MemoryTable {
                columns,
                rows,
                unique_key: None,
            },
        );
        self
    }

    /// Reject every insert into `table`
    pub fn fail_inserts_into(&self, table: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_inserts
            .insert(table.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.lock().unwrap().fail_inserts.clear();
    }

    /// Drop the connection when an insert into `table` is attempted
    pub fn lose_connection_on(&self, table: &str) {
        self.state.lock().unwrap().lose_connection_on = Some(table.to_string());
    }

    pub fn table(&self, name: &str) -> Option<MemoryTable> {
        self.state.lock().unwrap().tables.get(name).cloned()
    }

    pub fn row_count(&self, name: &str) -> usize {
        self.table(name).map(|t| t.rows.len()).unwrap_or(0)
    }

    /// Values of `column` in `table`, in insertion order
    pub fn column_values(&self, table: &str, column: &str) -> Vec<Value> {
        let Some(table) = self.table(table) else {
            return Vec::new();
        };
        let Some(index) = table.column_index(column) else {
            return Vec::new();
        };
        table.rows.iter().map(|r| r[index].clone()).collect()
    }

    /// DDL statements issued so far
    pub fn ddl(&self) -> Vec<String> {
        self.state.lock().unwrap().ddl.clone()
    }

    /// Number of successful insert batches
    pub fn insert_batches(&self) -> usize {
        self.state.lock().unwrap().insert_batches
    }

    fn check_connection(state: &State) -> DatabaseResult<()> {
        if state.connection_lost {
            Err(DatabaseError::ConnectionFailed(
                "connection closed".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait(?Send)]
impl DestinationWriter for MemoryDestination {
    async fn describe_table(&self, table: &str) -> DatabaseResult<Option<Vec<ColumnDef>>> {
        let state = self.state.lock().unwrap();
        Self::check_connection(&state)?;
        Ok(state.tables.get(table).map(|t| t.columns.clone()))
    }

    async fn create_table(&self, table: &TableDef) -> DatabaseResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_connection(&state)?;
        state.ddl.push(table.create_table_sql());
        state.ddl.push(table.unique_index_sql());
        state
            .tables
            .entry(table.name.clone())
            .or_insert_with(|| MemoryTable {
                columns: table.columns.clone(),
                rows: Vec::new(),
                unique_key: Some(table.dedup_key.clone()),
            });
        Ok(())
    }

    async fn ensure_unique_key(&self, table: &str, column: &str) -> DatabaseResult<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_connection(&state)?;
        state.ddl.push(format!("unique index {}.{}", table, column));

        let entry = state
            .tables
            .get_mut(table)
            .ok_or_else(|| DatabaseError::MigrationFailed(format!("no table {}", table)))?;
        let index = entry
            .column_index(column)
            .ok_or_else(|| DatabaseError::MigrationFailed(format!("no column {}", column)))?;

        let mut seen = HashSet::new();
        for row in &entry.rows {
            if let Some(key) = row[index].dedup_key()
                && !seen.insert(key)
            {
                return Err(DatabaseError::MigrationFailed(format!(
                    "could not create unique index: {}.{} has duplicate values",
                    table, column
                )));
            }
        }

        entry.unique_key = Some(column.to_string());
        Ok(())
    }

    async fn existing_keys(
        &self,
        table: &str,
        key: &ColumnDef,
    ) -> DatabaseResult<HashSet<KeyValue>> {
        let state = self.state.lock().unwrap();
        Self::check_connection(&state)?;

        let entry = state
            .tables
            .get(table)
            .ok_or_else(|| DatabaseError::QueryFailed(format!("no table {}", table)))?;
        let index = entry
            .column_index(&key.name)
            .ok_or_else(|| DatabaseError::QueryFailed(format!("no column {}", key.name)))?;

        entry
            .rows
            .iter()
            .filter_map(|row| match row[index].coerce(key.column_type) {
                Ok(value) => value.dedup_key().map(Ok),
                Err(e) => Some(Err(DatabaseError::QueryFailed(e.to_string()))),
            })
            .collect()
    }

    async fn insert_rows(
        &self,
        table: &str,
        columns: &[ColumnDef],
        rows: &[Row],
    ) -> DatabaseResult<u64> {
        let mut state = self.state.lock().unwrap();
        Self::check_connection(&state)?;

        if state.lose_connection_on.as_deref() == Some(table) {
            state.connection_lost = true;
            return Err(DatabaseError::ConnectionFailed(
                "server closed the connection unexpectedly".to_string(),
            ));
        }
        if state.fail_inserts.contains(table) {
            return Err(DatabaseError::InsertFailed(format!(
                "{}: injected constraint violation",
                table
            )));
        }

        let entry = state
            .tables
            .get_mut(table)
            .ok_or_else(|| DatabaseError::InsertFailed(format!("no table {}", table)))?;

        let positions = columns
            .iter()
            .map(|c| {
                entry.column_index(&c.name).ok_or_else(|| {
                    DatabaseError::InsertFailed(format!("{}: no column {}", table, c.name))
                })
            })
            .collect::<DatabaseResult<Vec<_>>>()?;

        let mut staged: Vec<Row> = Vec::with_capacity(rows.len());
        for row in rows {
            let mut full = vec![Value::Null; entry.columns.len()];
            for (value, &position) in row.iter().zip(&positions) {
                full[position] = value.clone();
            }
            staged.push(full);
        }

        // All-or-nothing unique check across stored and staged rows
        if let Some(key_index) = entry
            .unique_key
            .as_deref()
            .and_then(|k| entry.column_index(k))
        {
            let mut keys: HashSet<KeyValue> = entry
                .rows
                .iter()
                .filter_map(|r| r[key_index].dedup_key())
                .collect();
            for row in &staged {
                if let Some(key) = row[key_index].dedup_key()
                    && !keys.insert(key.clone())
                {
                    return Err(DatabaseError::InsertFailed(format!(
                        "{}: duplicate key {}",
                        table, key
                    )));
                }
            }
        }

        let count = staged.len() as u64;
        entry.rows.extend(staged);
        state.insert_batches += 1;
        Ok(count)
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }

    async fn close(&self) -> DatabaseResult<()> {
        Ok(())
    }
}

/// Create a SQLite export at `dir/export.db` from a SQL script
pub fn create_source(dir: &Path, sql: &str) -> PathBuf {
    let path = dir.join("export.db");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(sql).unwrap();
    path
}

/// Run more SQL against an existing export, as the producing app would
pub fn update_source(path: &Path, sql: &str) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(sql).unwrap();
}
