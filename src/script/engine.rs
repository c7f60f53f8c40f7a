//! Running transformation scripts against rows

use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;

use super::bindings::{BindingProjector, BindingSet, RowVerdict};
use crate::config::BindingConfig;
use crate::error::Result;
use crate::model::Row;

/// An external script execution engine.
///
/// The engine reads and writes the binding set; it never sees the row itself.
pub trait ScriptEngine: Send + Sync {
    fn eval(&self, script: &str, bindings: &mut BindingSet) -> anyhow::Result<()>;
}

impl<F> ScriptEngine for F
where
    F: Fn(&str, &mut BindingSet) -> anyhow::Result<()> + Send + Sync,
{
    fn eval(&self, script: &str, bindings: &mut BindingSet) -> anyhow::Result<()> {
        self(script, bindings)
    }
}

/// Result of running a script on one row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    Processed,
    Failed,
}

/// Outcome counts of a batch run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub processed: usize,
    pub failed: usize,
}

/// Runs a script against rows through a binding set
pub struct ScriptRunner<E> {
    engine: E,
    projector: BindingProjector,
    mark_processed: bool,
}

impl<E: ScriptEngine> ScriptRunner<E> {
    /// Create a runner with the default binding configuration
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            projector: BindingProjector::default(),
            mark_processed: true,
        }
    }

    /// Set the binding configuration
    pub fn with_config(mut self, config: BindingConfig) -> Self {
        self.projector = BindingProjector::new(config);
        self
    }

    /// Count rows whose script finished without a verdict as processed
    pub fn with_mark_processed(mut self, mark_processed: bool) -> Self {
        self.mark_processed = mark_processed;
        self
    }

    pub fn projector(&self) -> &BindingProjector {
        &self.projector
    }

    /// Run `script` against one row.
    ///
    /// A failing script is recorded in the row's memory and its writes are
    /// discarded. Only a missing memory or a rejected name collision is
    /// returned as an error.
    pub fn run(&self, script: &str, row: &mut Row) -> Result<RowOutcome> {
        self.run_with_output(script, row).map(|(outcome, _)| outcome)
    }

    /// Run `script` against one row and hand back the `$EMPTY` row if the
    /// script filled it.
    ///
    /// A failed row emits nothing.
    pub fn run_with_output(&self, script: &str, row: &mut Row) -> Result<(RowOutcome, Option<Row>)> {
        let mut bindings = self.projector.project(row)?;
        if let Err(error) = self.engine.eval(script, &mut bindings) {
            row.error_occurred_with(error)?;
            return Ok((RowOutcome::Failed, None));
        }
        bindings.write_back(row);

        let outcome = match bindings.current_row_mut().take_verdict() {
            Some(RowVerdict::Failed(cause)) => {
                row.error_occurred_with(cause)?;
                return Ok((RowOutcome::Failed, None));
            }
            Some(RowVerdict::Processed) => {
                row.successfully_processed()?;
                RowOutcome::Processed
            }
            None => {
                if self.mark_processed {
                    row.successfully_processed()?;
                }
                RowOutcome::Processed
            }
        };
        Ok((outcome, bindings.take_empty_row()))
    }

    /// Run `script` against every row in parallel
    pub fn run_all(&self, script: &str, rows: &mut [Row]) -> Result<RunStats> {
        let outcomes: Vec<RowOutcome> = rows
            .par_iter_mut()
            .map(|row| self.run(script, row))
            .collect::<Result<_>>()?;

        let mut stats = RunStats::default();
        for outcome in outcomes {
            match outcome {
                RowOutcome::Processed => stats.processed += 1,
                RowOutcome::Failed => stats.failed += 1,
            }
        }
        debug!(processed = stats.processed, failed = stats.failed, "script run finished");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::memory::Memory;
    use crate::model::Value;
    use std::sync::Arc;

    fn uppercase_name(_script: &str, bindings: &mut BindingSet) -> anyhow::Result<()> {
        let upper = bindings
            .value("name")
            .and_then(Value::as_str)
            .map(str::to_uppercase)
            .ok_or_else(|| anyhow::anyhow!("name is not a string"))?;
        bindings.set("name", upper);
        bindings.memory().increment();
        Ok(())
    }

    fn rows(memory: &Arc<Memory>, names: &[Value]) -> Vec<Row> {
        names
            .iter()
            .map(|name| {
                let mut row = Row::new();
                row.add_column(0, "name", name.clone()).unwrap();
                row.use_memory(Arc::clone(memory));
                row
            })
            .collect()
    }

    #[test]
    fn test_script_writes_reach_row() {
        let memory = Arc::new(Memory::new());
        let mut row = rows(&memory, &[Value::from("duke")]).pop().unwrap();
        let runner = ScriptRunner::new(uppercase_name);

        assert_eq!(runner.run("upper(name)", &mut row).unwrap(), RowOutcome::Processed);
        assert_eq!(row.column_value("name"), Some(&Value::from("DUKE")));
        assert_eq!(memory.processed_row_count(), 1);
        assert_eq!(memory.counter_value(), 1);
    }

    #[test]
    fn test_failing_script_is_captured() {
        let memory = Arc::new(Memory::new());
        let mut row = rows(&memory, &[Value::Int(7)]).pop().unwrap();
        let runner = ScriptRunner::new(uppercase_name);

        assert_eq!(runner.run("upper(name)", &mut row).unwrap(), RowOutcome::Failed);
        assert_eq!(row.column_value("name"), Some(&Value::Int(7)));
        assert_eq!(memory.erroneous_row_count(), 1);
        assert_eq!(memory.processed_row_count(), 0);
        let error = memory.processing_error(row.id()).unwrap();
        assert!(error.to_string().contains("name is not a string"));
    }

    #[test]
    fn test_script_verdicts() {
        let memory = Arc::new(Memory::new());
        let engine = |script: &str, bindings: &mut BindingSet| -> anyhow::Result<()> {
            bindings.set("name", "touched");
            if script == "reject" {
                bindings.current_row_mut().mark_failed("rejected by script");
            } else {
                bindings.current_row_mut().mark_processed();
            }
            Ok(())
        };
        let runner = ScriptRunner::new(engine).with_mark_processed(false);
        let mut batch = rows(&memory, &[Value::from("a"), Value::from("b")]);

        assert_eq!(runner.run("reject", &mut batch[0]).unwrap(), RowOutcome::Failed);
        assert_eq!(runner.run("accept", &mut batch[1]).unwrap(), RowOutcome::Processed);
        assert_eq!(memory.erroneous_row_count(), 1);
        assert_eq!(memory.processed_row_count(), 1);
        assert_eq!(batch[0].column_value("name"), Some(&Value::from("touched")));
    }

    #[test]
    fn test_no_verdict_without_auto_mark() {
        let memory = Arc::new(Memory::new());
        let engine = |_: &str, _: &mut BindingSet| -> anyhow::Result<()> { Ok(()) };
        let runner = ScriptRunner::new(engine).with_mark_processed(false);
        let mut row = rows(&memory, &[Value::from("a")]).pop().unwrap();

        assert_eq!(runner.run("noop", &mut row).unwrap(), RowOutcome::Processed);
        assert_eq!(memory.processed_row_count(), 0);
    }

    #[test]
    fn test_run_all_in_parallel() {
        let memory = Arc::new(Memory::new());
        let mut names: Vec<Value> = (0..50).map(|i| Value::from(format!("row{}", i))).collect();
        names.extend((0..10).map(Value::Int));
        let mut batch = rows(&memory, &names);

        let stats = ScriptRunner::new(uppercase_name)
            .run_all("upper(name)", &mut batch)
            .unwrap();
        assert_eq!(stats, RunStats { processed: 50, failed: 10 });
        assert_eq!(memory.counter_value(), 50);
        assert_eq!(memory.erroneous_rows().len(), 10);
        assert_eq!(batch[3].column_value("name"), Some(&Value::from("ROW3")));
    }

    #[test]
    fn test_filled_empty_row_is_emitted() {
        let memory = Arc::new(Memory::new());
        let engine = |script: &str, bindings: &mut BindingSet| -> anyhow::Result<()> {
            let name = bindings.value("name").cloned().unwrap_or_default();
            if script == "emit" {
                let extra = bindings
                    .empty_row_mut()
                    .ok_or_else(|| anyhow::anyhow!("no scratch row"))?;
                extra.add_column(0, "copy", name)?;
            }
            Ok(())
        };
        let runner = ScriptRunner::new(engine);
        let mut row = rows(&memory, &[Value::from("duke")]).pop().unwrap();

        let (outcome, extra) = runner.run_with_output("emit", &mut row).unwrap();
        assert_eq!(outcome, RowOutcome::Processed);
        let extra = extra.unwrap();
        assert_eq!(extra.column_value("copy"), Some(&Value::from("duke")));
        assert!(Arc::ptr_eq(extra.memory().unwrap(), &memory));
        assert_ne!(extra.id(), row.id());

        let (_, nothing) = runner.run_with_output("quiet", &mut row).unwrap();
        assert!(nothing.is_none());
    }

    #[test]
    fn test_failed_row_emits_nothing() {
        let memory = Arc::new(Memory::new());
        let engine = |_: &str, bindings: &mut BindingSet| -> anyhow::Result<()> {
            if let Some(extra) = bindings.empty_row_mut() {
                extra.add_column(0, "partial", 1i64)?;
            }
            bindings.current_row_mut().mark_failed("rejected");
            Ok(())
        };
        let mut row = rows(&memory, &[Value::from("a")]).pop().unwrap();
        let (outcome, extra) = ScriptRunner::new(engine)
            .run_with_output("x", &mut row)
            .unwrap();
        assert_eq!(outcome, RowOutcome::Failed);
        assert!(extra.is_none());
    }

    #[test]
    fn test_missing_memory_is_not_captured() {
        let mut row = Row::new();
        row.add_column(0, "name", "duke").unwrap();
        let err = ScriptRunner::new(uppercase_name)
            .run("upper(name)", &mut row)
            .unwrap_err();
        assert!(matches!(err, Error::PreconditionViolation(_)));
    }
}
