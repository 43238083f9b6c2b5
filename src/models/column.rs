//! Column model shared by the source reader and the destination writer

use serde::{Deserialize, Serialize};

/// Semantic type of a column
///
/// This is the common vocabulary between the SQLite source (which reports
/// free-form declared types) and the PostgreSQL destination (which reports
/// catalog type names). Both sides are mapped onto it through fixed tables,
/// see [`ColumnType::from_source_declared`] and
/// [`ColumnType::from_destination_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// 64-bit signed integer
    Integer,
    /// Double precision floating point
    Real,
    /// Free text (also the safe default for unrecognized types)
    Text,
    /// Timestamp without time zone
    Timestamp,
    /// Boolean
    Boolean,
    /// Raw bytes
    Blob,
}

impl ColumnType {
    /// Map a SQLite declared column type onto a semantic type
    ///
    /// SQLite lets a column be declared with any string, so this follows its
    /// affinity rules loosely: the declared type is upper-cased and matched on
    /// prefixes and substrings. An empty or unrecognized declaration maps to
    /// [`ColumnType::Text`] so no value is ever lost.
    ///
    /// # Example
    ///
    /// ```rust
    /// use health_data_importer::models::ColumnType;
    ///
    /// assert_eq!(ColumnType::from_source_declared("INTEGER"), ColumnType::Integer);
    /// assert_eq!(ColumnType::from_source_declared("varchar(20)"), ColumnType::Text);
    /// assert_eq!(ColumnType::from_source_declared(""), ColumnType::Text);
    /// ```
    pub fn from_source_declared(declared: &str) -> Self {
        let upper = declared.trim().to_uppercase();

        if upper.is_empty() {
            return ColumnType::Text;
        }
        if upper.starts_with("BOOL") {
            return ColumnType::Boolean;
        }
        if upper.starts_with("TIMESTAMP") || upper.starts_with("DATETIME") || upper == "DATE" {
            return ColumnType::Timestamp;
        }
        if upper.contains("INT") {
            return ColumnType::Integer;
        }
        if upper.starts_with("REAL") || upper.starts_with("FLOA") || upper.starts_with("DOUB") {
            return ColumnType::Real;
        }
        if upper.starts_with("BLOB") {
            return ColumnType::Blob;
        }

        ColumnType::Text
    }

    /// Map a PostgreSQL catalog type name (`information_schema.columns.data_type`)
    /// onto a semantic type
    pub fn from_destination_type(data_type: &str) -> Self {
        match data_type.trim().to_lowercase().as_str() {
            "bigint" | "integer" | "smallint" | "int8" | "int4" | "int2" => ColumnType::Integer,
            "double precision" | "real" | "float8" | "float4" | "numeric" => ColumnType::Real,
            "boolean" | "bool" => ColumnType::Boolean,
            "bytea" => ColumnType::Blob,
            t if t.starts_with("timestamp") || t == "date" => ColumnType::Timestamp,
            _ => ColumnType::Text,
        }
    }

    /// PostgreSQL type used when creating a destination column
    pub fn postgres_type(&self) -> &'static str {
        match self {
            ColumnType::Integer => "BIGINT",
            ColumnType::Real => "DOUBLE PRECISION",
            ColumnType::Text => "TEXT",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Blob => "BYTEA",
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::Integer => write!(f, "integer"),
            ColumnType::Real => write!(f, "real"),
            ColumnType::Text => write!(f, "text"),
            ColumnType::Timestamp => write!(f, "timestamp"),
            ColumnType::Boolean => write!(f, "boolean"),
            ColumnType::Blob => write!(f, "blob"),
        }
    }
}

/// Name and semantic type of one column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name, exactly as reported by the database
    pub name: String,
    /// Semantic type
    pub column_type: ColumnType,
    /// Type string as reported by the database it was read from
    #[serde(default)]
    pub declared_type: String,
}

impl ColumnDef {
    /// Create a column definition with an explicit semantic type
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            declared_type: column_type.postgres_type().to_string(),
        }
    }

    /// Create a column definition from a SQLite `PRAGMA table_info` entry
    pub fn from_source(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        let declared_type = declared_type.into();
        Self {
            name: name.into(),
            column_type: ColumnType::from_source_declared(&declared_type),
            declared_type,
        }
    }

    /// Create a column definition from an `information_schema.columns` entry
    pub fn from_destination(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        let declared_type = data_type.into();
        Self {
            name: name.into(),
            column_type: ColumnType::from_destination_type(&declared_type),
            declared_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_type_mapping() {
        assert_eq!(ColumnType::from_source_declared("INTEGER"), ColumnType::Integer);
        assert_eq!(ColumnType::from_source_declared("int"), ColumnType::Integer);
        assert_eq!(ColumnType::from_source_declared("BIGINT"), ColumnType::Integer);
        assert_eq!(ColumnType::from_source_declared("REAL"), ColumnType::Real);
        assert_eq!(ColumnType::from_source_declared("double"), ColumnType::Real);
        assert_eq!(ColumnType::from_source_declared("FLOAT"), ColumnType::Real);
        assert_eq!(ColumnType::from_source_declared("TEXT"), ColumnType::Text);
        assert_eq!(ColumnType::from_source_declared("VARCHAR(255)"), ColumnType::Text);
        assert_eq!(ColumnType::from_source_declared("BLOB"), ColumnType::Blob);
        assert_eq!(ColumnType::from_source_declared("BOOLEAN"), ColumnType::Boolean);
        assert_eq!(ColumnType::from_source_declared("DATETIME"), ColumnType::Timestamp);
        assert_eq!(ColumnType::from_source_declared("timestamp"), ColumnType::Timestamp);
        assert_eq!(ColumnType::from_source_declared("DATE"), ColumnType::Timestamp);
    }

    #[test]
    fn test_unknown_source_type_defaults_to_text() {
        assert_eq!(ColumnType::from_source_declared(""), ColumnType::Text);
        assert_eq!(ColumnType::from_source_declared("NUMERIC"), ColumnType::Text);
        assert_eq!(ColumnType::from_source_declared("GEOMETRY"), ColumnType::Text);
    }

    #[test]
    fn test_destination_type_mapping() {
        assert_eq!(ColumnType::from_destination_type("bigint"), ColumnType::Integer);
        assert_eq!(ColumnType::from_destination_type("integer"), ColumnType::Integer);
        assert_eq!(
            ColumnType::from_destination_type("double precision"),
            ColumnType::Real
        );
        assert_eq!(
            ColumnType::from_destination_type("timestamp without time zone"),
            ColumnType::Timestamp
        );
        assert_eq!(ColumnType::from_destination_type("bytea"), ColumnType::Blob);
        assert_eq!(
            ColumnType::from_destination_type("character varying"),
            ColumnType::Text
        );
    }

    #[test]
    fn test_postgres_type_round_trips_through_destination_mapping() {
        for column_type in [
            ColumnType::Integer,
            ColumnType::Real,
            ColumnType::Text,
            ColumnType::Timestamp,
            ColumnType::Boolean,
            ColumnType::Blob,
        ] {
            assert_eq!(
                ColumnType::from_destination_type(column_type.postgres_type()),
                column_type
            );
        }
    }

    #[test]
    fn test_column_def_from_source() {
        let column = ColumnDef::from_source("count", "INTEGER");
        assert_eq!(column.name, "count");
        assert_eq!(column.column_type, ColumnType::Integer);
        assert_eq!(column.declared_type, "INTEGER");
    }
}
