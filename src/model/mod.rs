//! Record model: values, columns and rows

mod column;
mod row;
mod value;

pub use column::{Column, DEFAULT_DESTINATION, UNPLACED};
pub use row::{Children, Row, RowId, MISSING_COLUMN_MARKER};
pub use value::{Value, ValueKind};
