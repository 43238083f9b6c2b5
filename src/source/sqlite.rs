//! SQLite source implementation

use rusqlite::{Connection, OpenFlags};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};

use super::{SourceError, SourceResult};
use crate::database::schema::quote_identifier;
use crate::models::{ColumnDef, Row, TableData, Value};

/// How long to wait on a lock held by the process producing the export
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Read-only handle on a SQLite export
///
/// Owns the open connection for the duration of one run. When opened as a
/// snapshot, the file is first copied into a private temporary directory
/// that lives as long as this handle.
pub struct SqliteSource {
    /// Path the source was requested from
    path: PathBuf,
    /// SHA-256 of the file contents at open time
    fingerprint: String,
    connection: Connection,
    /// Keeps the snapshot copy alive (None when reading in place)
    _snapshot: Option<TempDir>,
}

impl std::fmt::Debug for SqliteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteSource")
            .field("path", &self.path)
            .field("fingerprint", &self.fingerprint)
            .field("snapshot", &self._snapshot.is_some())
            .finish()
    }
}

impl SqliteSource {
    /// Open the source file in place, read-only
    pub fn open(path: impl AsRef<Path>) -> SourceResult<Self> {
        Self::open_with(path, false)
    }

    /// Copy the source file to a temporary directory and read the copy
    pub fn open_snapshot(path: impl AsRef<Path>) -> SourceResult<Self> {
        Self::open_with(path, true)
    }

    /// Open the source, optionally from a snapshot copy
    ///
    /// Fails with [`SourceError::SourceUnavailable`] when the file is
    /// missing, cannot be copied or opened, or is not a SQLite database.
    pub fn open_with(path: impl AsRef<Path>, snapshot: bool) -> SourceResult<Self> {
        let path = path.as_ref().to_path_buf();
        let unavailable = |reason: String| SourceError::SourceUnavailable {
            path: path.clone(),
            reason,
        };

        if !path.is_file() {
            return Err(unavailable("file not found".to_string()));
        }

        let fingerprint = compute_file_fingerprint(&path)
            .map_err(|e| unavailable(format!("failed to read file: {}", e)))?;

        let (read_path, snapshot_dir) = if snapshot {
            let dir = tempfile::tempdir()
                .map_err(|e| unavailable(format!("failed to create snapshot dir: {}", e)))?;
            let copy = copy_with_sidecars(&path, dir.path())
                .map_err(|e| unavailable(format!("failed to snapshot file: {}", e)))?;
            debug!(source = %path.display(), snapshot = %copy.display(), "Reading source snapshot");
            (copy, Some(dir))
        } else {
            (path.clone(), None)
        };

        let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let connection = Connection::open_with_flags(&read_path, flags)
            .map_err(|e| unavailable(format!("failed to open: {}", e)))?;
        connection
            .busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| unavailable(format!("failed to configure connection: {}", e)))?;

        // Opening is lazy; touching the schema is what detects a corrupt or
        // non-SQLite file.
        connection
            .query_row("SELECT count(*) FROM sqlite_master", [], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(|e| unavailable(format!("not a readable SQLite database: {}", e)))?;

        info!(
            source = %path.display(),
            fingerprint = %fingerprint,
            snapshot,
            "Opened source database"
        );

        Ok(Self {
            path,
            fingerprint,
            connection,
            _snapshot: snapshot_dir,
        })
    }

    /// Path the source was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// SHA-256 of the source file as it was when opened
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Whether rows are read from a snapshot copy
    pub fn is_snapshot(&self) -> bool {
        self._snapshot.is_some()
    }

    /// Names of all tables in the source, sorted
    pub fn list_tables(&self) -> SourceResult<Vec<String>> {
        let read_failed = |e: rusqlite::Error| SourceError::ReadFailed {
            table: "sqlite_master".to_string(),
            reason: e.to_string(),
        };

        let mut stmt = self
            .connection
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .map_err(read_failed)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(read_failed)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(read_failed)?;

        Ok(names)
    }

    /// Check whether a table exists in the source
    pub fn has_table(&self, table: &str) -> SourceResult<bool> {
        self.connection
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [table],
                |row| row.get::<_, i64>(0),
            )
            .map(|count| count > 0)
            .map_err(|e| SourceError::ReadFailed {
                table: table.to_string(),
                reason: e.to_string(),
            })
    }

    /// Column definitions of a table, in declaration order
    pub fn read_columns(&self, table: &str) -> SourceResult<Vec<ColumnDef>> {
        if !self.has_table(table)? {
            return Err(SourceError::TableNotFound(table.to_string()));
        }

        let read_failed = |e: rusqlite::Error| SourceError::ReadFailed {
            table: table.to_string(),
            reason: e.to_string(),
        };

        let mut stmt = self
            .connection
            .prepare(&format!("PRAGMA table_info({})", quote_identifier(table)))
            .map_err(read_failed)?;
        let columns = stmt
            .query_map([], |row| {
                let name: String = row.get(1)?;
                let declared: Option<String> = row.get(2)?;
                Ok(ColumnDef::from_source(name, declared.unwrap_or_default()))
            })
            .map_err(read_failed)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(read_failed)?;

        Ok(columns)
    }

    /// Read the structure and every row of a table
    ///
    /// Fails with [`SourceError::TableNotFound`] when the table is absent.
    pub fn read_table(&self, table: &str) -> SourceResult<TableData> {
        let columns = self.read_columns(table)?;
        if columns.is_empty() {
            return Ok(TableData::new(table, columns, Vec::new()));
        }

        let read_failed = |e: rusqlite::Error| SourceError::ReadFailed {
            table: table.to_string(),
            reason: e.to_string(),
        };

        let column_list = columns
            .iter()
            .map(|c| quote_identifier(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("SELECT {} FROM {}", column_list, quote_identifier(table));

        let width = columns.len();
        let mut stmt = self.connection.prepare(&sql).map_err(read_failed)?;
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get_ref(i).map(Value::from))
                    .collect::<Result<Row, _>>()
            })
            .map_err(read_failed)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(read_failed)?;

        debug!(table, rows = rows.len(), columns = width, "Read source table");

        Ok(TableData::new(table, columns, rows))
    }
}

/// Compute the SHA-256 of a file, streaming its contents
pub fn compute_file_fingerprint(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Copy a database file and any WAL sidecar into `dir`, returning the copy's path
fn copy_with_sidecars(path: &Path, dir: &Path) -> std::io::Result<PathBuf> {
    let file_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "source.db".into());
    let target = dir.join(&file_name);
    std::fs::copy(path, &target)?;

    let mut wal_name = file_name;
    wal_name.push("-wal");
    let wal = path.with_file_name(&wal_name);
    if wal.is_file() {
        std::fs::copy(&wal, dir.join(&wal_name))?;
    }

    Ok(target)
}
