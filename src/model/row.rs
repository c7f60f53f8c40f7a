//! Row: a name- and position-indexed collection of columns, optionally
//! nesting child rows.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{RwLock, RwLockReadGuard};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::column::Column;
use super::value::Value;
use crate::error::{Error, Result};
use crate::memory::Memory;

/// Placeholder rendered for a position without a column
pub const MISSING_COLUMN_MARKER: &str = "-";

static NEXT_ROW_ID: AtomicU64 = AtomicU64::new(1);

/// Stable row identifier, used as key in the memory's error registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(u64);

impl RowId {
    fn next() -> Self {
        RowId(NEXT_ROW_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: u64) -> Self {
        RowId(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Slot of a column in the row's arena
type ColumnId = u32;

/// Child rows of a row.
///
/// Cloning the handle shares the list; rows produced by
/// [`Row::columns_grouped_by_destination`] all point at the same children.
#[derive(Clone, Default)]
pub struct Children(Arc<RwLock<Vec<Row>>>);

impl Children {
    pub fn push(&self, child: Row) {
        self.0.write().push(child);
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().is_empty()
    }

    /// Read access to the child rows
    pub fn read(&self) -> RwLockReadGuard<'_, Vec<Row>> {
        self.0.read()
    }

    /// Check whether both handles refer to the same list
    pub fn shares_with(&self, other: &Children) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn key(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    /// Check whether `target` is this list or nested anywhere below it
    fn reaches(&self, target: &Children, visited: &mut FxHashSet<usize>) -> bool {
        if self.shares_with(target) {
            return true;
        }
        if !visited.insert(self.key()) {
            return false;
        }
        self.0
            .read()
            .iter()
            .any(|child| child.children.reaches(target, visited))
    }

    /// Copy of the list; lists shared in the source stay shared in the copy.
    fn detached(&self, copies: &mut FxHashMap<usize, Children>) -> Children {
        if let Some(copy) = copies.get(&self.key()) {
            return copy.clone();
        }
        let copy = Children::default();
        copies.insert(self.key(), copy.clone());
        let rows: Vec<Row> = self
            .0
            .read()
            .iter()
            .map(|row| row.detached_with(copies))
            .collect();
        *copy.0.write() = rows;
        copy
    }
}

impl std::fmt::Debug for Children {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Children").field("len", &self.len()).finish()
    }
}

/// One record flowing through the pipeline.
///
/// Columns live in an arena and are reachable through two indices: by unique
/// name and by position. Positions of `-1` are pending and never indexed.
pub struct Row {
    id: RowId,
    columns: FxHashMap<ColumnId, Column>,
    by_name: IndexMap<String, ColumnId>,
    by_index: FxHashMap<i32, ColumnId>,
    next_column: ColumnId,
    children: Children,
    memory: Option<Arc<Memory>>,
}

impl Default for Row {
    fn default() -> Self {
        Self::new()
    }
}

impl Row {
    /// Create an empty row
    pub fn new() -> Self {
        Self {
            id: RowId::next(),
            columns: FxHashMap::default(),
            by_name: IndexMap::new(),
            by_index: FxHashMap::default(),
            next_column: 0,
            children: Children::default(),
            memory: None,
        }
    }

    pub fn id(&self) -> RowId {
        self.id
    }

    /// Bind the run-wide memory
    pub fn use_memory(&mut self, memory: Arc<Memory>) {
        self.memory = Some(memory);
    }

    /// The bound memory, if any
    pub fn memory(&self) -> Option<&Arc<Memory>> {
        self.memory.as_ref()
    }

    /// Add or override (by name) a column holding a value
    pub fn add_column(
        &mut self,
        index: i32,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<&mut Self> {
        let column = Column::new(index, name, value)?;
        Ok(self.add(column))
    }

    /// Add or override (by name) a column with a null value
    pub fn add_null_column(&mut self, index: i32, name: impl Into<String>) -> Result<&mut Self> {
        let column = Column::null(index, name)?;
        Ok(self.add(column))
    }

    /// Add or override (by name) an existing column
    pub fn add_column_instance(&mut self, column: Column) -> &mut Self {
        self.add(column)
    }

    fn add(&mut self, column: Column) -> &mut Self {
        if let Some(existing) = self.by_name.get(column.name()).copied() {
            self.unlink(existing);
        }
        let id = self.next_column;
        self.next_column += 1;
        if column.index() >= 0 {
            self.by_index.insert(column.index(), id);
        }
        self.by_name.insert(column.name().to_string(), id);
        self.columns.insert(id, column);
        self
    }

    /// Drop a column from the arena and both indices
    fn unlink(&mut self, id: ColumnId) -> Option<Column> {
        let column = self.columns.remove(&id)?;
        if self.by_name.get(column.name()) == Some(&id) {
            self.by_name.shift_remove(column.name());
        } else {
            self.by_name.retain(|_, v| *v != id);
        }
        if self.by_index.get(&column.index()) == Some(&id) {
            self.by_index.remove(&column.index());
        } else {
            self.by_index.retain(|_, v| *v != id);
        }
        Some(column)
    }

    /// Remove the column with the given name
    pub fn remove_column(&mut self, name: &str) -> Option<Column> {
        let id = self.by_name.get(name).copied()?;
        self.unlink(id)
    }

    /// Value of the named column; `None` when absent or null-valued
    pub fn column_value(&self, name: &str) -> Option<&Value> {
        self.column_by_name(name).map(Column::value)
    }

    /// Column with the given name; `None` when absent or null-valued
    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.column(name).filter(|c| !c.is_null_value())
    }

    /// Column at the given position; `None` when absent, pending or null-valued
    pub fn column_by_index(&self, index: i32) -> Option<&Column> {
        if index < 0 {
            return None;
        }
        self.by_index
            .get(&index)
            .and_then(|id| self.columns.get(id))
            .filter(|c| !c.is_null_value())
    }

    /// Column with the given name, including null-valued columns
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.by_name.get(name).and_then(|id| self.columns.get(id))
    }

    /// Mutable access to the named column, including null-valued columns.
    ///
    /// Changing the name or position through this reference desynchronizes the
    /// indices until [`Row::reindex_columns`] is called.
    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        let id = self.by_name.get(name)?;
        self.columns.get_mut(id)
    }

    /// All columns in name-index order
    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.by_name.values().filter_map(|id| self.columns.get(id))
    }

    /// Apply `action` to every column matching `predicate`.
    ///
    /// The indices are repaired afterwards, so the action may rename or move
    /// columns.
    pub fn find_columns_and_apply<P, A>(&mut self, predicate: P, mut action: A)
    where
        P: Fn(&Column) -> bool,
        A: FnMut(&mut Column),
    {
        let ids: Vec<ColumnId> = self.by_name.values().copied().collect();
        for id in ids {
            if let Some(column) = self.columns.get_mut(&id) {
                if predicate(&*column) {
                    action(column);
                }
            }
        }
        self.reindex_columns();
    }

    /// Rename every column matching `predicate` to `rename(column)`
    pub fn find_columns_and_change_name<P, F>(&mut self, predicate: P, rename: F)
    where
        P: Fn(&Column) -> bool,
        F: Fn(&Column) -> String,
    {
        // Snapshot first: renaming rewrites the name index.
        let renames: Vec<(String, String)> = self
            .columns()
            .filter(|&c| predicate(c))
            .map(|c| (c.name().to_string(), rename(c)))
            .collect();
        for (old, new) in renames {
            self.change_column_name(&old, &new);
        }
    }

    /// Rename a column. No-op when `old_name` is absent; an existing column
    /// named `new_name` is replaced.
    pub fn change_column_name(&mut self, old_name: &str, new_name: &str) {
        if old_name == new_name {
            return;
        }
        let Some(id) = self.by_name.shift_remove(old_name) else {
            return;
        };
        if let Some(displaced) = self.by_name.get(new_name).copied() {
            self.unlink(displaced);
        }
        if let Some(column) = self.columns.get_mut(&id) {
            column.set_name(new_name);
        }
        self.by_name.insert(new_name.to_string(), id);
    }

    /// Replace the value of the named column with `transformer(value)`.
    ///
    /// No-op when the column is absent or null-valued.
    pub fn transform_column<F>(&mut self, name: &str, transformer: F)
    where
        F: FnOnce(&Value) -> Value,
    {
        let Some(column) = self.column_mut(name) else {
            return;
        };
        if column.is_null_value() {
            return;
        }
        let output = transformer(column.value());
        column.set_value(output);
    }

    /// Columns sorted ascending by position
    pub fn columns_sorted_by_column_index(&self) -> Vec<&Column> {
        let mut sorted: Vec<&Column> = self.columns().collect();
        sorted.sort_by_key(|c| c.index());
        sorted
    }

    /// Split this row into one row per destination.
    ///
    /// Columns are moved into the new rows. Every new row shares this row's
    /// children list and memory.
    pub fn columns_grouped_by_destination(mut self) -> IndexMap<String, Row> {
        let mut grouped: IndexMap<String, Row> = IndexMap::new();
        let ids: Vec<ColumnId> = self.by_name.values().copied().collect();
        for id in ids {
            let Some(column) = self.columns.remove(&id) else {
                continue;
            };
            let group = grouped
                .entry(column.target_sink().to_string())
                .or_insert_with(|| {
                    let mut row = Row::new();
                    row.children = self.children.clone();
                    row.memory = self.memory.clone();
                    row
                });
            group.add(column);
        }
        grouped
    }

    /// Column names by position from `0` to `size - 1`, `"-"` for gaps.
    ///
    /// `size` counts pending columns too, which themselves are never listed.
    pub fn sorted_column_names(&self) -> Vec<String> {
        (0..self.number_of_columns() as i32)
            .map(|i| {
                self.by_index
                    .get(&i)
                    .and_then(|id| self.columns.get(id))
                    .map_or_else(|| MISSING_COLUMN_MARKER.to_string(), |c| c.name().to_string())
            })
            .collect()
    }

    /// Names of all columns
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    /// Name to value map; null-valued columns map to `None`
    pub fn column_values(&self) -> IndexMap<String, Option<Value>> {
        self.columns()
            .map(|c| (c.name().to_string(), c.value_as_option().cloned()))
            .collect()
    }

    /// Name to rendered value map
    pub fn columns_as_string(&self) -> IndexMap<String, String> {
        self.columns()
            .map(|c| (c.name().to_string(), c.value().to_string()))
            .collect()
    }

    pub fn number_of_columns(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Check whether no column with this name exists
    pub fn is_column_empty(&self, name: &str) -> bool {
        !self.by_name.contains_key(name)
    }

    pub fn destination(&self, name: &str) -> Option<&str> {
        self.column(name).map(Column::target_sink)
    }

    /// Route the named column to another destination. No-op when absent.
    pub fn change_destination(&mut self, name: &str, destination: &str) -> &mut Self {
        if let Some(column) = self.column_mut(name) {
            column.set_target_sink(destination);
        }
        self
    }

    pub fn is_number(&self, name: &str) -> bool {
        self.column(name).is_some_and(Column::is_number)
    }

    pub fn is_string(&self, name: &str) -> bool {
        self.column(name).is_some_and(Column::is_string)
    }

    /// Add a child row.
    ///
    /// Rows split by destination share one children list, so a split row
    /// whose subtree reaches this row's list is rejected.
    pub fn add_child(&mut self, child: Row) -> Result<&mut Self> {
        if child.children.reaches(&self.children, &mut FxHashSet::default()) {
            return Err(Error::InvalidArgument(format!(
                "Row {} shares its children with row {} and cannot become its child",
                child.id, self.id
            )));
        }
        self.children.push(child);
        Ok(self)
    }

    pub fn children(&self) -> &Children {
        &self.children
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    fn bound_memory(&self) -> Result<&Arc<Memory>> {
        self.memory.as_ref().ok_or_else(|| {
            Error::PreconditionViolation(format!("Row {} has no memory bound", self.id))
        })
    }

    /// Flag this row as successfully processed
    pub fn successfully_processed(&self) -> Result<()> {
        self.bound_memory()?.processed();
        Ok(())
    }

    /// Flag this row as erroneous without recording a cause
    pub fn error_occurred(&self) -> Result<()> {
        self.bound_memory()?.error_occurred();
        Ok(())
    }

    /// Record `error` as the cause of this row's failure
    pub fn error_occurred_with<E>(&self, error: E) -> Result<()>
    where
        E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    {
        self.bound_memory()?.add_processing_error(self, error);
        Ok(())
    }

    /// Rebuild both indices from the columns' own names and positions.
    ///
    /// Repairs the row after a column was renamed or moved out of band. On a
    /// name collision the renamed column wins, as with
    /// [`Row::change_column_name`]; otherwise the later added column wins.
    pub fn reindex_columns(&mut self) {
        let entries: Vec<(String, ColumnId)> = self.by_name.drain(..).collect();
        self.by_index.clear();
        let mut winners: IndexMap<String, (ColumnId, bool)> = IndexMap::new();
        for (key, id) in entries {
            let Some(column) = self.columns.get(&id) else {
                continue;
            };
            let renamed = column.name() != key;
            let name = column.name().to_string();
            let loser = match winners.get_mut(&name) {
                None => {
                    winners.insert(name, (id, renamed));
                    continue;
                }
                Some(slot) => {
                    let (kept, kept_renamed) = *slot;
                    if (renamed && !kept_renamed) || (renamed == kept_renamed && id > kept) {
                        *slot = (id, renamed);
                        kept
                    } else {
                        id
                    }
                }
            };
            if let Some(dropped) = self.columns.remove(&loser) {
                debug!(row = %self.id, column = dropped.name(), "dropped column on name collision");
            }
        }
        for (name, (id, _)) in winners {
            if let Some(index) = self.columns.get(&id).map(Column::index) {
                if index >= 0 {
                    self.by_index.insert(index, id);
                }
            }
            self.by_name.insert(name, id);
        }
    }

    /// Copy of this row without a memory binding, children copied the same way.
    ///
    /// Keeps the row id. Used for the memory's error registry, which must not
    /// hold rows that point back at the memory.
    pub(crate) fn detached(&self) -> Row {
        self.detached_with(&mut FxHashMap::default())
    }

    fn detached_with(&self, copies: &mut FxHashMap<usize, Children>) -> Row {
        Row {
            id: self.id,
            columns: self.columns.clone(),
            by_name: self.by_name.clone(),
            by_index: self.by_index.clone(),
            next_column: self.next_column,
            children: self.children.detached(copies),
            memory: None,
        }
    }
}

impl std::fmt::Debug for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Row")
            .field("id", &self.id)
            .field("columns", &self.columns_sorted_by_column_index())
            .field("children", &self.children)
            .finish()
    }
}

impl std::fmt::Display for Row {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Row{{id={}, columns=[", self.id)?;
        for (i, column) in self.columns_sorted_by_column_index().iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}@{}={}", column.name(), column.index(), column.value())?;
        }
        write!(f, "], children={}}}", self.children.len())
    }
}
