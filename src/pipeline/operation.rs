//! Operations: the units a pipeline sequences.
//!
//! An [`Operation`] has a name and an `execute` contract. Errors returned
//! from `execute` (and panics) become operation-scoped faults; a returned
//! [`OperationResult`] with faults is a failed step. `release` runs right
//! after every execution, whatever its outcome.

use crate::context::Context;
use crate::graph::fault::Fault;
use crate::graph::process::{Process, ProcessResult};
use crate::graph::stats::ProcessStats;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome class of an operation or a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Failed,
    /// The error policy declined to continue; remaining steps were skipped.
    Aborted,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => write!(f, "success"),
            Status::Failed => write!(f, "failed"),
            Status::Aborted => write!(f, "aborted"),
        }
    }
}

/// Status plus the structured faults behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub status: Status,
    pub faults: Vec<Fault>,
    /// Set when the error policy already ruled on these faults inside a
    /// nested sequence, so enclosing sequences do not ask again.
    #[serde(skip)]
    pub(crate) handled: bool,
}

impl OperationResult {
    pub fn success() -> Self {
        Self {
            status: Status::Success,
            faults: Vec::new(),
            handled: false,
        }
    }

    pub fn failed(faults: Vec<Fault>) -> Self {
        Self {
            status: Status::Failed,
            faults,
            handled: false,
        }
    }

    pub fn aborted(faults: Vec<Fault>) -> Self {
        Self {
            status: Status::Aborted,
            faults,
            handled: true,
        }
    }

    /// Success when `faults` is empty, failed otherwise.
    pub fn from_faults(faults: Vec<Fault>) -> Self {
        if faults.is_empty() {
            Self::success()
        } else {
            Self::failed(faults)
        }
    }

    pub(crate) fn handled(mut self) -> Self {
        self.handled = true;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn is_aborted(&self) -> bool {
        self.status == Status::Aborted
    }
}

impl From<ProcessResult> for OperationResult {
    fn from(result: ProcessResult) -> Self {
        OperationResult::from_faults(result.faults)
    }
}

/// A named unit of pipeline work.
pub trait Operation: Send {
    fn name(&self) -> &str;

    fn execute(&mut self, ctx: &Context) -> anyhow::Result<OperationResult>;

    /// Release resources held by the last execution.
    fn release(&mut self) {}
}

impl Operation for Process {
    fn name(&self) -> &str {
        Process::name(self)
    }

    fn execute(&mut self, ctx: &Context) -> anyhow::Result<OperationResult> {
        Ok(Process::execute(self, ctx)?.into())
    }
}

// ── Task ──

type Cleanup = Box<dyn FnMut() + Send>;

/// An arbitrary closure as an operation.
pub struct Task<F> {
    name: String,
    work: F,
    cleanup: Option<Cleanup>,
}

impl<F> Task<F>
where
    F: FnMut(&Context) -> anyhow::Result<()> + Send,
{
    pub fn new(name: impl Into<String>, work: F) -> Self {
        Self {
            name: name.into(),
            work,
            cleanup: None,
        }
    }

    /// Run `cleanup` after every execution.
    pub fn on_release(mut self, cleanup: impl FnMut() + Send + 'static) -> Self {
        self.cleanup = Some(Box::new(cleanup));
        self
    }
}

impl<F> Operation for Task<F>
where
    F: FnMut(&Context) -> anyhow::Result<()> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self, ctx: &Context) -> anyhow::Result<OperationResult> {
        (self.work)(ctx)?;
        Ok(OperationResult::success())
    }

    fn release(&mut self) {
        if let Some(cleanup) = self.cleanup.as_mut() {
            cleanup();
        }
    }
}

// ── ProcessStep ──

/// Builds a fresh [`Process`] on every execution, so the same step can run
/// inside loops and across pipeline runs.
pub struct ProcessStep<F> {
    name: String,
    factory: F,
    last: Option<ProcessStats>,
}

impl<F> ProcessStep<F>
where
    F: FnMut(&Context) -> anyhow::Result<Process> + Send,
{
    pub fn new(name: impl Into<String>, factory: F) -> Self {
        Self {
            name: name.into(),
            factory,
            last: None,
        }
    }

    /// Statistics of the most recent execution.
    pub fn last_stats(&self) -> Option<&ProcessStats> {
        self.last.as_ref()
    }
}

impl<F> Operation for ProcessStep<F>
where
    F: FnMut(&Context) -> anyhow::Result<Process> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self, ctx: &Context) -> anyhow::Result<OperationResult> {
        let mut process = (self.factory)(ctx)?;
        let result = process.execute(ctx)?;
        self.last = Some(result.stats.clone());
        Ok(result.into())
    }
}
