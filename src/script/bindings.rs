//! Projection of a row and the shared memory into a script namespace.
//!
//! A [`BindingSet`] holds three reserved entries (`$ROW`, `$EMPTY`,
//! `$MEMORY`), the configured globals, and one entry per non-empty column
//! name. Script writes to column entries are copied back onto the row with
//! [`BindingSet::write_back`].

use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use tracing::{debug, trace};

use crate::config::{BindingConfig, CollisionPolicy};
use crate::error::{Error, Result};
use crate::memory::Memory;
use crate::model::{Row, RowId, Value};

/// A single entry of a binding set
#[derive(Debug)]
pub enum Binding {
    /// A plain value: a column value or a global
    Value(Value),
    /// The shared memory of the run
    Memory(Arc<Memory>),
    /// The row being processed, reachable through [`BindingSet::current_row_mut`]
    CurrentRow(RowId),
    /// A standalone row owned by the binding set
    Row(Row),
}

impl Binding {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Binding::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_memory(&self) -> Option<&Arc<Memory>> {
        match self {
            Binding::Memory(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_row(&self) -> Option<&Row> {
        match self {
            Binding::Row(r) => Some(r),
            _ => None,
        }
    }
}

/// Outcome a script assigned to its row
#[derive(Debug)]
pub enum RowVerdict {
    Processed,
    Failed(Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// Handle to the row being processed, as seen by a script
#[derive(Debug)]
pub struct RowHandle {
    id: RowId,
    memory: Arc<Memory>,
    verdict: Option<RowVerdict>,
}

impl RowHandle {
    pub fn id(&self) -> RowId {
        self.id
    }

    pub fn memory(&self) -> &Arc<Memory> {
        &self.memory
    }

    /// Flag the row as successfully processed
    pub fn mark_processed(&mut self) {
        self.verdict = Some(RowVerdict::Processed);
    }

    /// Flag the row as failed with `cause`
    pub fn mark_failed<E>(&mut self, cause: E)
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        self.verdict = Some(RowVerdict::Failed(cause.into()));
    }

    pub fn verdict(&self) -> Option<&RowVerdict> {
        self.verdict.as_ref()
    }

    pub fn take_verdict(&mut self) -> Option<RowVerdict> {
        self.verdict.take()
    }
}

/// Name to value namespace handed to a script engine for one row
#[derive(Debug)]
pub struct BindingSet {
    entries: IndexMap<String, Binding>,
    column_names: FxHashSet<String>,
    dirty: FxHashSet<String>,
    current_row: RowHandle,
    empty_row_name: String,
}

impl BindingSet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.entries.get(name)
    }

    /// Value bound under `name`, if it is a plain value
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(Binding::as_value)
    }

    /// Bound names in binding order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Check whether `name` is bound to a column of the row
    pub fn is_column_binding(&self, name: &str) -> bool {
        self.column_names.contains(name)
    }

    /// The shared memory of the run
    pub fn memory(&self) -> &Arc<Memory> {
        self.current_row.memory()
    }

    pub fn current_row(&self) -> &RowHandle {
        &self.current_row
    }

    pub fn current_row_mut(&mut self) -> &mut RowHandle {
        &mut self.current_row
    }

    /// The scratch row a script may fill to emit an additional record.
    ///
    /// `None` when a column or global shadows the scratch row's name.
    pub fn empty_row_mut(&mut self) -> Option<&mut Row> {
        match self.entries.get_mut(&self.empty_row_name) {
            Some(Binding::Row(row)) => Some(row),
            _ => None,
        }
    }

    /// Take the scratch row out if the script filled it.
    ///
    /// A fresh empty row bound to the same memory takes its place.
    pub fn take_empty_row(&mut self) -> Option<Row> {
        let memory = Arc::clone(self.memory());
        let row = self.empty_row_mut()?;
        if row.is_empty() && !row.has_children() {
            return None;
        }
        let mut fresh = Row::new();
        fresh.use_memory(memory);
        Some(std::mem::replace(row, fresh))
    }

    /// Bind `value` under `name`, returning the previous binding.
    ///
    /// Writes to column bindings are remembered for [`BindingSet::write_back`].
    /// Other names only change the namespace.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Binding> {
        let name = name.into();
        if self.column_names.contains(&name) {
            self.dirty.insert(name.clone());
        }
        self.entries.insert(name, Binding::Value(value.into()))
    }

    /// Copy every written column binding back onto `row`.
    ///
    /// Returns the number of columns updated.
    pub fn write_back(&self, row: &mut Row) -> usize {
        let mut written = 0;
        for (name, binding) in &self.entries {
            if !self.dirty.contains(name) {
                continue;
            }
            let (Some(value), Some(column)) = (binding.as_value(), row.column_mut(name)) else {
                continue;
            };
            column.set_value(value.clone());
            written += 1;
        }
        trace!(row = %row.id(), written, "wrote script bindings back");
        written
    }
}

/// Builds binding sets from rows
#[derive(Debug, Clone, Default)]
pub struct BindingProjector {
    config: BindingConfig,
}

impl BindingProjector {
    pub fn new(config: BindingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BindingConfig {
        &self.config
    }

    /// Build a fresh binding set for `row`.
    ///
    /// The row must have a memory bound. Columns with an empty name are
    /// skipped.
    pub fn project(&self, row: &Row) -> Result<BindingSet> {
        let memory = row.memory().cloned().ok_or_else(|| {
            Error::PreconditionViolation(format!(
                "Row {} has no memory bound, cannot build script bindings",
                row.id()
            ))
        })?;

        let mut entries = IndexMap::new();
        entries.insert(self.config.row_name.clone(), Binding::CurrentRow(row.id()));
        let mut empty = Row::new();
        empty.use_memory(Arc::clone(&memory));
        entries.insert(self.config.empty_row_name.clone(), Binding::Row(empty));
        entries.insert(
            self.config.memory_name.clone(),
            Binding::Memory(Arc::clone(&memory)),
        );
        for (name, value) in &self.config.globals {
            entries
                .entry(name.clone())
                .or_insert_with(|| Binding::Value(value.clone()));
        }

        let mut column_names = FxHashSet::default();
        for column in row.columns() {
            let name = column.name();
            if name.is_empty() {
                continue;
            }
            if entries.contains_key(name) {
                match self.config.collision_policy {
                    CollisionPolicy::Shadow => {}
                    CollisionPolicy::Reject => {
                        return Err(Error::ReservedNameCollision(name.to_string()))
                    }
                    CollisionPolicy::Skip => continue,
                }
            }
            entries.insert(name.to_string(), Binding::Value(column.value().clone()));
            column_names.insert(name.to_string());
        }

        debug!(row = %row.id(), bindings = entries.len(), "built script bindings");
        Ok(BindingSet {
            entries,
            column_names,
            dirty: FxHashSet::default(),
            current_row: RowHandle {
                id: row.id(),
                memory,
                verdict: None,
            },
            empty_row_name: self.config.empty_row_name.clone(),
        })
    }
}

/// Build a binding set for `row` with the default configuration
pub fn create_bindings(row: &Row) -> Result<BindingSet> {
    BindingProjector::default().project(row)
}
