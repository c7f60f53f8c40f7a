//! Run-scoped shared context: key/value store, counters and the per-row
//! error registry.
//!
//! One `Memory` is created per processing run and shared by every row through
//! an `Arc`. All operations are safe to call concurrently from many workers.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::warn;

use crate::error::{Error, Result};
use crate::model::{Row, RowId, Value};

/// A captured row failure together with a detached copy of the row
#[derive(Debug)]
struct ProcessingFailure {
    row: Row,
    error: Arc<Error>,
}

/// Shared context of one processing run
#[derive(Debug, Default)]
pub struct Memory {
    store: DashMap<String, Value>,
    processing_errors: DashMap<RowId, ProcessingFailure>,
    counter: AtomicI64,
    processed_row_count: AtomicU64,
    error_count: AtomicU64,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under `key`, returning the previous value
    pub fn put(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.store.insert(key.into(), value.into())
    }

    /// Get a copy of the value stored under `key`
    pub fn get(&self, key: &str) -> Option<Value> {
        self.store.get(key).map(|entry| entry.value().clone())
    }

    /// Number of entries in the key/value store
    pub fn store_len(&self) -> usize {
        self.store.len()
    }

    pub fn increment(&self) {
        self.counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement(&self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn counter_value(&self) -> i64 {
        self.counter.load(Ordering::Relaxed)
    }

    /// Count one successfully processed row
    pub fn processed(&self) {
        self.processed_row_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one erroneous row
    pub fn error_occurred(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed_row_count(&self) -> u64 {
        self.processed_row_count.load(Ordering::Relaxed)
    }

    pub fn erroneous_row_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Record `error` as the cause of `row`'s failure and count the error.
    ///
    /// A second report for the same row replaces the recorded cause.
    pub fn add_processing_error<E>(&self, row: &Row, error: E)
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        let error = Error::RowProcessingFailure {
            row: row.id(),
            source: error.into(),
        };
        warn!(row = %row.id(), error = %error, "row processing failed");
        self.processing_errors.insert(
            row.id(),
            ProcessingFailure {
                row: row.detached(),
                error: Arc::new(error),
            },
        );
        self.error_occurred();
    }

    /// Check whether any row failure was recorded
    pub fn errors_occurred(&self) -> bool {
        !self.processing_errors.is_empty()
    }

    /// All recorded row failures
    pub fn processing_errors(&self) -> Vec<Arc<Error>> {
        self.processing_errors
            .iter()
            .map(|entry| Arc::clone(&entry.value().error))
            .collect()
    }

    /// The recorded failure of a specific row
    pub fn processing_error(&self, row: RowId) -> Option<Arc<Error>> {
        self.processing_errors
            .get(&row)
            .map(|entry| Arc::clone(&entry.value().error))
    }

    /// Copies of all rows that had processing errors, without memory binding
    pub fn erroneous_rows(&self) -> Vec<Row> {
        self.processing_errors
            .iter()
            .map(|entry| entry.value().row.detached())
            .collect()
    }

    /// Snapshot of the run outcome
    pub fn summary(&self) -> RunSummary {
        let mut errors: Vec<ErrorReport> = self
            .processing_errors
            .iter()
            .map(|entry| ErrorReport {
                row: *entry.key(),
                message: entry.value().error.to_string(),
            })
            .collect();
        errors.sort_by_key(|e| e.row);
        RunSummary {
            counter: self.counter_value(),
            processed_rows: self.processed_row_count(),
            erroneous_rows: self.erroneous_row_count(),
            errors,
        }
    }

    /// Run summary rendered as JSON
    pub fn summary_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.summary())?)
    }
}

impl std::fmt::Display for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Memory{{store={}, processing_errors={}, counter={}, processed_rows={}, erroneous_rows={}}}",
            self.store.len(),
            self.processing_errors.len(),
            self.counter_value(),
            self.processed_row_count(),
            self.erroneous_row_count()
        )
    }
}

/// Serializable outcome of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub counter: i64,
    pub processed_rows: u64,
    pub erroneous_rows: u64,
    pub errors: Vec<ErrorReport>,
}

/// One row failure in a [`RunSummary`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub row: RowId,
    pub message: String,
}
