//! Scripting bridge between rows and external script engines

mod bindings;
mod engine;

pub use bindings::{create_bindings, Binding, BindingProjector, BindingSet, RowHandle, RowVerdict};
pub use engine::{RowOutcome, RunStats, ScriptEngine, ScriptRunner};
