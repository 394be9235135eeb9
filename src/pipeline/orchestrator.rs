//! The pipeline orchestrator.
//!
//! A [`Pipeline`] is an ordered list of operations run against one shared
//! [`Context`]. A run initializes the context's pools, executes the steps
//! under the error policy and tears the pools down again:
//!
//! ```text
//! initialize pools -> step 1 -> policy? -> step 2 -> ... -> deallocate pools
//!                                 \-> abort: remaining steps skipped
//! ```

use crate::context::Context;
use crate::error::Result;
use crate::pipeline::control::run_steps;
use crate::pipeline::operation::{Operation, OperationResult, Status};
use crate::pipeline::report::PipelineReport;
use chrono::Utc;
use std::time::Instant;

pub struct Pipeline {
    name: String,
    steps: Vec<Box<dyn Operation>>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step.
    pub fn then(mut self, op: impl Operation + 'static) -> Self {
        self.push(op);
        self
    }

    pub fn push(&mut self, op: impl Operation + 'static) {
        self.steps.push(Box::new(op));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step in order.
    ///
    /// Step failures are reported in the returned report; `Err` means the
    /// pools could not be initialized. A panic inside the error policy
    /// propagates after the pools are torn down.
    pub fn run(&mut self, ctx: &Context) -> Result<PipelineReport> {
        let span = tracing::info_span!("pipeline", name = %self.name);
        let _enter = span.enter();
        tracing::info!("Starting pipeline '{}' with {} steps", self.name, self.steps.len());

        let started_at = Utc::now();
        let clock = Instant::now();
        ctx.take_journal();
        let pools = ctx.pools().session()?;

        let result = run_steps(&mut self.steps, ctx);
        drop(pools);

        let status = match result.status {
            Status::Aborted => Status::Aborted,
            _ if result.faults.is_empty() => Status::Success,
            _ => Status::Failed,
        };
        let report = PipelineReport {
            name: self.name.clone(),
            started_at,
            elapsed: clock.elapsed(),
            status,
            faults: result.faults,
            steps: ctx.take_journal(),
        };
        match report.status {
            Status::Success => tracing::info!("{}", report.summary()),
            _ => tracing::warn!("{}", report.summary()),
        }
        Ok(report)
    }

    /// Run on tokio's blocking pool, for hosts driving pipelines from async
    /// code. The pipeline is handed back with its report.
    #[cfg(feature = "async")]
    pub async fn run_async(
        mut self,
        ctx: std::sync::Arc<Context>,
    ) -> Result<(Self, PipelineReport)> {
        let task = tokio::task::spawn_blocking(move || {
            let report = self.run(&ctx);
            (self, report)
        });
        match task.await {
            Ok((pipeline, report)) => Ok((pipeline, report?)),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(crate::error::EngineError::Interrupted(e.to_string())),
        }
    }
}

/// A pipeline nested as a step runs its steps in the enclosing run; pools
/// are managed by the outermost pipeline.
impl Operation for Pipeline {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self, ctx: &Context) -> anyhow::Result<OperationResult> {
        Ok(run_steps(&mut self.steps, ctx))
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("steps", &self.step_names())
            .finish()
    }
}
