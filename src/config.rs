//! Configuration of the scripting bridge

use indexmap::IndexMap;

use crate::model::Value;

/// Reserved binding name of the shared memory
pub const MEMORY_BINDING: &str = "$MEMORY";
/// Reserved binding name of the current row handle
pub const ROW_BINDING: &str = "$ROW";
/// Reserved binding name of a fresh, empty row
pub const EMPTY_ROW_BINDING: &str = "$EMPTY";

/// What happens when a column name equals an already bound name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// The column replaces the existing binding
    #[default]
    Shadow,
    /// Binding construction fails with `ReservedNameCollision`
    Reject,
    /// The column is not bound, the existing binding stays
    Skip,
}

impl std::str::FromStr for CollisionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "shadow" => Ok(CollisionPolicy::Shadow),
            "reject" => Ok(CollisionPolicy::Reject),
            "skip" => Ok(CollisionPolicy::Skip),
            _ => Err(format!("Unknown collision policy: {}", s)),
        }
    }
}

/// Configuration for building script binding sets
#[derive(Debug, Clone)]
pub struct BindingConfig {
    /// Name under which the shared memory is bound
    pub memory_name: String,
    /// Name under which the current row handle is bound
    pub row_name: String,
    /// Name under which a fresh empty row is bound
    pub empty_row_name: String,
    /// Handling of column names that equal reserved or global names
    pub collision_policy: CollisionPolicy,
    /// Engine-level bindings added to every binding set before the columns
    pub globals: IndexMap<String, Value>,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            memory_name: MEMORY_BINDING.to_string(),
            row_name: ROW_BINDING.to_string(),
            empty_row_name: EMPTY_ROW_BINDING.to_string(),
            collision_policy: CollisionPolicy::default(),
            globals: IndexMap::new(),
        }
    }
}

impl BindingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the collision policy
    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = policy;
        self
    }

    /// Add an engine-level binding
    pub fn with_global(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.globals.insert(name.into(), value.into());
        self
    }

    /// Rename the memory binding
    pub fn with_memory_name(mut self, name: impl Into<String>) -> Self {
        self.memory_name = name.into();
        self
    }

    /// Rename the current row binding
    pub fn with_row_name(mut self, name: impl Into<String>) -> Self {
        self.row_name = name.into();
        self
    }

    /// Rename the empty row binding
    pub fn with_empty_row_name(mut self, name: impl Into<String>) -> Self {
        self.empty_row_name = name.into();
        self
    }

    /// Number of bindings present before any column is projected
    pub fn fixed_binding_count(&self) -> usize {
        let mut names: Vec<&str> = vec![
            self.memory_name.as_str(),
            self.row_name.as_str(),
            self.empty_row_name.as_str(),
        ];
        names.extend(self.globals.keys().map(String::as_str));
        names.sort_unstable();
        names.dedup();
        names.len()
    }
}
