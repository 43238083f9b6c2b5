//! Dedup key resolution
//!
//! A table's dedup key is the first column of [`DEDUP_KEY_CANDIDATES`] that
//! the table has. The list is static so the same schema always resolves to
//! the same key; tables with none of the candidates are not importable.

use super::sync::ImportError;
use crate::models::ColumnDef;

/// Dedup key candidates, highest priority first
///
/// `row_id` is the export's row identifier. `local_date_time` and `time`
/// identify a measurement by its instant when no row identifier exists.
pub const DEDUP_KEY_CANDIDATES: &[&str] = &["row_id", "local_date_time", "time"];

/// First candidate present in `columns`, if any
pub fn resolve_dedup_key(columns: &[ColumnDef]) -> Option<&ColumnDef> {
    DEDUP_KEY_CANDIDATES
        .iter()
        .find_map(|candidate| columns.iter().find(|c| c.name == *candidate))
}

/// Resolve the dedup key of `table`, failing with [`ImportError::NoDedupKey`]
pub fn require_dedup_key<'a>(
    table: &str,
    columns: &'a [ColumnDef],
) -> Result<&'a ColumnDef, ImportError> {
    resolve_dedup_key(columns).ok_or_else(|| ImportError::NoDedupKey {
        table: table.to_string(),
        candidates: DEDUP_KEY_CANDIDATES.join(", "),
    })
}
