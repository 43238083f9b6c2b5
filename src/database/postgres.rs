//! PostgreSQL destination implementation
//!
//! One client per run, shared behind a mutex. Every table's bulk insert runs
//! in its own transaction.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_postgres::types::{ToSql, Type};

use super::config::{PostgresSection, mask_connection_string};
use super::schema::{TableDef, existing_keys_sql, insert_sql, rows_per_statement, unique_index_sql};
use super::{DatabaseError, DatabaseResult, DestinationWriter};
use crate::models::{ColumnDef, KeyValue, Row, Value};

const APPLICATION_NAME: &str = "health-data-importer";

const DESCRIBE_TABLE_SQL: &str = "SELECT column_name::text, data_type::text \
     FROM information_schema.columns \
     WHERE table_schema = current_schema() AND table_name = $1::text \
     ORDER BY ordinal_position";

/// PostgreSQL destination
pub struct PostgresBackend {
    /// Connection target with credentials masked, for logging
    target: String,
    /// PostgreSQL client (wrapped for async access)
    client: Arc<Mutex<tokio_postgres::Client>>,
}

impl PostgresBackend {
    /// Connect using the `[postgres]` configuration section
    pub async fn connect(section: &PostgresSection) -> DatabaseResult<Self> {
        let config = connection_config(section)?;
        Self::with_config(config, describe_target(section)).await
    }

    async fn with_config(config: tokio_postgres::Config, target: String) -> DatabaseResult<Self> {
        let (client, connection) = config.connect(tokio_postgres::NoTls).await.map_err(|e| {
            DatabaseError::ConnectionFailed(format!(
                "Failed to connect to PostgreSQL at {}: {}",
                target, e
            ))
        })?;

        // Spawn connection handler
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "PostgreSQL connection error");
            }
        });

        tracing::info!(destination = %target, "Connected to PostgreSQL");

        Ok(Self {
            target,
            client: Arc::new(Mutex::new(client)),
        })
    }
}

#[async_trait(?Send)]
impl DestinationWriter for PostgresBackend {
    async fn describe_table(&self, table: &str) -> DatabaseResult<Option<Vec<ColumnDef>>> {
        let client = self.client.lock().await;

        let rows = client
            .query(DESCRIBE_TABLE_SQL, &[&table])
            .await
            .map_err(|e| map_error(e, DatabaseError::QueryFailed, table))?;

        if rows.is_empty() {
            return Ok(None);
        }

        let columns = rows
            .iter()
            .map(|row| {
                let name: String = row.try_get(0)?;
                let data_type: String = row.try_get(1)?;
                Ok(ColumnDef::from_destination(name, data_type))
            })
            .collect::<Result<Vec<_>, tokio_postgres::Error>>()
            .map_err(|e| map_error(e, DatabaseError::QueryFailed, table))?;

        Ok(Some(columns))
    }

    async fn create_table(&self, table: &TableDef) -> DatabaseResult<()> {
        let client = self.client.lock().await;

        let ddl = format!("{};\n{};", table.create_table_sql(), table.unique_index_sql());
        client
            .batch_execute(&ddl)
            .await
            .map_err(|e| map_error(e, DatabaseError::MigrationFailed, &table.name))
    }

    async fn ensure_unique_key(&self, table: &str, column: &str) -> DatabaseResult<()> {
        let client = self.client.lock().await;

        client
            .batch_execute(&unique_index_sql(table, column))
            .await
            .map_err(|e| map_error(e, DatabaseError::MigrationFailed, table))
    }

    async fn existing_keys(
        &self,
        table: &str,
        key: &ColumnDef,
    ) -> DatabaseResult<HashSet<KeyValue>> {
        let client = self.client.lock().await;

        let rows = client
            .query(&existing_keys_sql(table, &key.name), &[])
            .await
            .map_err(|e| map_error(e, DatabaseError::QueryFailed, table))?;

        let mut keys = HashSet::with_capacity(rows.len());
        for row in &rows {
            let ty = row.columns()[0].type_().clone();
            let value = decode_value(row, 0, &ty)
                .and_then(|v| v.coerce(key.column_type).map_err(|e| e.to_string()))
                .map_err(|e| {
                    DatabaseError::QueryFailed(format!(
                        "{}: cannot read key `{}`: {}",
                        table, key.name, e
                    ))
                })?;
            if let Some(k) = value.dedup_key() {
                keys.insert(k);
            }
        }

        Ok(keys)
    }

    async fn insert_rows(
        &self,
        table: &str,
        columns: &[ColumnDef],
        rows: &[Row],
    ) -> DatabaseResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        if let Some(row) = rows.iter().find(|r| r.len() != columns.len()) {
            return Err(DatabaseError::InsertFailed(format!(
                "{}: row has {} values for {} columns",
                table,
                row.len(),
                columns.len()
            )));
        }

        let mut client = self.client.lock().await;
        let tx = client
            .transaction()
            .await
            .map_err(|e| map_error(e, DatabaseError::InsertFailed, table))?;

        let mut inserted = 0;
        for chunk in rows.chunks(rows_per_statement(columns.len())) {
            let statement = tx
                .prepare(&insert_sql(table, columns, chunk.len()))
                .await
                .map_err(|e| map_error(e, DatabaseError::InsertFailed, table))?;

            let types = statement.params();
            let params = chunk
                .iter()
                .flatten()
                .zip(types)
                .map(|(value, ty)| encode_param(value, ty))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| DatabaseError::InsertFailed(format!("{}: {}", table, e)))?;
            let param_refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p.as_ref()).collect();

            inserted += tx
                .execute(&statement, &param_refs)
                .await
                .map_err(|e| map_error(e, DatabaseError::InsertFailed, table))?;
        }

        // Dropping the transaction without commit rolls every chunk back.
        tx.commit()
            .await
            .map_err(|e| map_error(e, DatabaseError::InsertFailed, table))?;

        Ok(inserted)
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }

    async fn close(&self) -> DatabaseResult<()> {
        // PostgreSQL connection is closed when client is dropped
        tracing::debug!(destination = %self.target, "Closing PostgreSQL connection");
        Ok(())
    }
}

/// Build the client configuration for a `[postgres]` section
///
/// A connection string wins over the individual settings; the connect
/// timeout applies to both unless the string sets its own.
pub fn connection_config(section: &PostgresSection) -> DatabaseResult<tokio_postgres::Config> {
    let timeout = Duration::from_secs(section.connect_timeout_secs);

    let mut config = match &section.connection_string {
        Some(url) => {
            let mut config: tokio_postgres::Config = url.parse().map_err(|e| {
                DatabaseError::ConfigError(format!("Invalid PostgreSQL connection string: {}", e))
            })?;
            if config.get_connect_timeout().is_none() {
                config.connect_timeout(timeout);
            }
            config
        }
        None => {
            let mut config = tokio_postgres::Config::new();
            config.port(section.port).connect_timeout(timeout);
            if let Some(host) = &section.host {
                config.host(host);
            }
            if let Some(database) = &section.database {
                config.dbname(database);
            }
            if let Some(user) = &section.user {
                config.user(user);
            }
            if let Some(password) = &section.password {
                config.password(password);
            }
            config
        }
    };

    if config.get_application_name().is_none() {
        config.application_name(APPLICATION_NAME);
    }

    Ok(config)
}

fn describe_target(section: &PostgresSection) -> String {
    match &section.connection_string {
        Some(url) => mask_connection_string(url),
        None => format!(
            "{}:{}/{}",
            section.host.as_deref().unwrap_or("localhost"),
            section.port,
            section.database.as_deref().unwrap_or_default()
        ),
    }
}

fn map_error(
    e: tokio_postgres::Error,
    kind: fn(String) -> DatabaseError,
    context: &str,
) -> DatabaseError {
    if e.is_closed() {
        DatabaseError::ConnectionFailed(format!("{}: {}", context, e))
    } else {
        kind(format!("{}: {}", context, e))
    }
}

/// Bind a value to a statement parameter of PostgreSQL type `ty`
///
/// Nulls are bound as a typed null so the driver's type check still passes.
fn encode_param(value: &Value, ty: &Type) -> Result<Box<dyn ToSql + Sync>, String> {
    match ty.name() {
        "bool" => bind(value, ty, |v| match v {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }),
        "int2" => bind(value, ty, |v| match v {
            Value::Integer(i) => i16::try_from(*i).ok(),
            _ => None,
        }),
        "int4" => bind(value, ty, |v| match v {
            Value::Integer(i) => i32::try_from(*i).ok(),
            _ => None,
        }),
        "int8" => bind(value, ty, |v| match v {
            Value::Integer(i) => Some(*i),
            _ => None,
        }),
        "float4" => bind(value, ty, |v| match v {
            Value::Real(f) => Some(*f as f32),
            Value::Integer(i) => Some(*i as f32),
            _ => None,
        }),
        "float8" => bind(value, ty, |v| match v {
            Value::Real(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }),
        "text" | "varchar" | "bpchar" | "name" => bind(value, ty, |v| match v {
            Value::Text(s) => Some(s.clone()),
            other => Some(other.render()),
        }),
        "timestamp" => bind(value, ty, |v| match v {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }),
        "timestamptz" => bind(value, ty, |v| match v {
            Value::Timestamp(ts) => Some(ts.and_utc()),
            _ => None,
        }),
        "date" => bind(value, ty, |v| match v {
            Value::Timestamp(ts) => Some(ts.date()),
            _ => None,
        }),
        "bytea" => bind(value, ty, |v| match v {
            Value::Blob(b) => Some(b.clone()),
            _ => None,
        }),
        other => Err(format!("unsupported destination column type {}", other)),
    }
}

fn bind<T, F>(value: &Value, ty: &Type, convert: F) -> Result<Box<dyn ToSql + Sync>, String>
where
    T: ToSql + Sync + 'static,
    F: FnOnce(&Value) -> Option<T>,
{
    if value.is_null() {
        return Ok(Box::new(None::<T>));
    }
    match convert(value) {
        Some(v) => Ok(Box::new(Some(v))),
        None => Err(format!(
            "cannot bind {} to a {} column",
            value.render(),
            ty.name()
        )),
    }
}

/// Read column `idx` of `row` as a [`Value`]
fn decode_value(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> Result<Value, String> {
    fn get<'a, T: tokio_postgres::types::FromSql<'a>>(
        row: &'a tokio_postgres::Row,
        idx: usize,
    ) -> Result<Option<T>, String> {
        row.try_get::<_, Option<T>>(idx).map_err(|e| e.to_string())
    }

    let value = match ty.name() {
        "bool" => get::<bool>(row, idx)?.map(Value::Boolean),
        "int2" => get::<i16>(row, idx)?.map(|i| Value::Integer(i64::from(i))),
        "int4" => get::<i32>(row, idx)?.map(|i| Value::Integer(i64::from(i))),
        "int8" => get::<i64>(row, idx)?.map(Value::Integer),
        "float4" => get::<f32>(row, idx)?.map(|f| Value::Real(f64::from(f))),
        "float8" => get::<f64>(row, idx)?.map(Value::Real),
        "text" | "varchar" | "bpchar" | "name" => get::<String>(row, idx)?.map(Value::Text),
        "timestamp" => get::<NaiveDateTime>(row, idx)?.map(Value::Timestamp),
        "timestamptz" => get::<DateTime<Utc>>(row, idx)?.map(|t| Value::Timestamp(t.naive_utc())),
        "date" => get::<NaiveDate>(row, idx)?
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(Value::Timestamp),
        "bytea" => get::<Vec<u8>>(row, idx)?.map(Value::Blob),
        other => return Err(format!("unsupported column type {}", other)),
    };

    Ok(value.unwrap_or(Value::Null))
}
