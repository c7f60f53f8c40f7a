//! rowbridge - Record model and scripting bridge for row-oriented ETL
//!
//! Rows of named, positioned columns flow through a pipeline while a shared
//! [`Memory`] collects counters, scratch values and per-row failures. The
//! [`script`] module projects a row into a name/value namespace for an
//! external script engine and copies the script's writes back.

pub mod config;
pub mod error;
pub mod memory;
pub mod model;
pub mod script;

pub use config::{BindingConfig, CollisionPolicy};
pub use error::{Error, Result};
pub use memory::{Memory, RunSummary};
pub use model::{Column, Row, RowId, Value};
pub use script::{create_bindings, BindingProjector, BindingSet, ScriptEngine, ScriptRunner};
