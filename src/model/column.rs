//! Column: a single named, positioned field of a row

use serde::{Deserialize, Serialize};

use super::value::Value;
use crate::error::{Error, Result};

/// Destination assigned to columns that were never routed elsewhere
pub const DEFAULT_DESTINATION: &str = "*";

/// Position marker for a column that has not been placed yet
pub const UNPLACED: i32 = -1;

/// A single field value of a row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ColumnRecord")]
pub struct Column {
    /// Position within the row; `-1` means append/unspecified
    index: i32,
    /// Column name, may be empty
    name: String,
    /// Column value, `Value::Null` for a null column
    value: Value,
    /// Destination (sink) identifier
    target_sink: String,
}

impl Column {
    /// Create a column holding a value.
    ///
    /// An explicit `Value::Null` is rejected; use [`Column::null`] for a
    /// null-valued column.
    pub fn new(index: i32, name: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        let name = name.into();
        let value = value.into();
        if value.is_null() {
            return Err(Error::InvalidArgument(format!(
                "Value of {} cannot be null",
                name
            )));
        }
        Self::with_parts(index, name, value)
    }

    /// Create a null-valued column
    pub fn null(index: i32, name: impl Into<String>) -> Result<Self> {
        Self::with_parts(index, name.into(), Value::Null)
    }

    fn with_parts(index: i32, name: String, value: Value) -> Result<Self> {
        check_index(index)?;
        Ok(Self {
            index,
            name,
            value,
            target_sink: DEFAULT_DESTINATION.to_string(),
        })
    }

    pub fn index(&self) -> i32 {
        self.index
    }

    /// Move the column to another position.
    ///
    /// When the column belongs to a row, call `Row::reindex_columns` afterwards.
    pub fn set_index(&mut self, index: i32) -> Result<()> {
        check_index(index)?;
        self.index = index;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the column in place.
    ///
    /// Prefer `Row::change_column_name`; an in-place rename of a column owned by
    /// a row is only picked up by the row's name index on `Row::reindex_columns`.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Value as an option, `None` for a null column
    pub fn value_as_option(&self) -> Option<&Value> {
        if self.value.is_null() {
            None
        } else {
            Some(&self.value)
        }
    }

    pub fn set_value(&mut self, value: impl Into<Value>) {
        self.value = value.into();
    }

    pub fn target_sink(&self) -> &str {
        &self.target_sink
    }

    pub fn set_target_sink(&mut self, destination: impl Into<String>) {
        self.target_sink = destination.into();
    }

    pub fn is_null_value(&self) -> bool {
        self.value.is_null()
    }

    pub fn is_number(&self) -> bool {
        self.value.is_number()
    }

    pub fn is_string(&self) -> bool {
        self.value.is_string()
    }
}

/// Serialized form of a [`Column`], checked on the way in
#[derive(Deserialize)]
struct ColumnRecord {
    index: i32,
    name: String,
    #[serde(default)]
    value: Value,
    #[serde(default = "default_destination")]
    target_sink: String,
}

fn default_destination() -> String {
    DEFAULT_DESTINATION.to_string()
}

impl TryFrom<ColumnRecord> for Column {
    type Error = Error;

    fn try_from(record: ColumnRecord) -> Result<Self> {
        let mut column = Column::with_parts(record.index, record.name, record.value)?;
        column.target_sink = record.target_sink;
        Ok(column)
    }
}

impl std::fmt::Display for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Column{{index={}, name={}, value={}, kind={}, destination={}}}",
            self.index,
            self.name,
            self.value,
            self.value.kind(),
            self.target_sink
        )
    }
}

fn check_index(index: i32) -> Result<()> {
    if index < UNPLACED {
        return Err(Error::InvalidArgument(format!(
            "Column index {} is below {}",
            index, UNPLACED
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_column_defaults() {
        let column = Column::new(0, "name", "duke").unwrap();
        assert_eq!(column.index(), 0);
        assert_eq!(column.name(), "name");
        assert_eq!(column.value(), &Value::from("duke"));
        assert_eq!(column.target_sink(), DEFAULT_DESTINATION);
        assert!(column.is_string());
        assert!(!column.is_number());
    }

    #[test]
    fn test_explicit_null_value_rejected() {
        let err = Column::new(0, "name", Value::Null).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_null_column() {
        let column = Column::null(2, "empty").unwrap();
        assert!(column.is_null_value());
        assert!(column.value_as_option().is_none());
        assert!(!column.is_number());
    }

    #[test]
    fn test_index_below_unplaced_rejected() {
        assert!(Column::new(-2, "x", 1i64).is_err());
        let mut column = Column::new(UNPLACED, "x", 1i64).unwrap();
        assert!(column.set_index(-5).is_err());
        assert_eq!(column.index(), UNPLACED);
    }

    #[test]
    fn test_deserialize_checks_index() {
        let err = serde_json::from_str::<Column>(r#"{"index":-3,"name":"x","value":1}"#)
            .unwrap_err();
        assert!(err.to_string().contains("below -1"));

        let column: Column =
            serde_json::from_str(r#"{"index":-1,"name":"x","value":null}"#).unwrap();
        assert_eq!(column.index(), UNPLACED);
        assert!(column.is_null_value());
        assert_eq!(column.target_sink(), DEFAULT_DESTINATION);
    }

    #[test]
    fn test_serde_keeps_destination() {
        let mut column = Column::new(3, "city", "Munich").unwrap();
        column.set_target_sink("archive");
        let json = serde_json::to_string(&column).unwrap();
        let back: Column = serde_json::from_str(&json).unwrap();
        assert_eq!(back, column);
    }
}
