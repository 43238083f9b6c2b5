//! Models module
//!
//! Defines the data structures passed between the source reader, the
//! schema mapper and the destination writer during one import run.

pub mod column;
pub mod table;
pub mod value;

pub use column::{ColumnDef, ColumnType};
pub use table::{Row, TableData, TableSpec};
pub use value::{CoercionError, KeyValue, Value};
