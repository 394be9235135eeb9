//! Sequencing and control flow.
//!
//! [`run_steps`] is the one place the error policy is consulted: after a step
//! fails, the policy decides between continuing and aborting. Nested
//! sequences (loop bodies) consult it themselves and mark their result as
//! handled, and an abort travels outward without asking again.

use crate::context::Context;
use crate::graph::fault::{panic_message, Fault};
use crate::pipeline::operation::{Operation, OperationResult, Status};
use std::panic::{self, AssertUnwindSafe};
use std::thread;

/// Run one step: catch its errors and panics as operation faults, then
/// release it and record it in the journal.
pub(crate) fn run_step(step: &mut dyn Operation, ctx: &Context) -> OperationResult {
    let name = step.name().to_string();
    let span = tracing::info_span!("step", name = %name);
    let _enter = span.enter();
    tracing::debug!("Running step '{}'", name);

    let result = match panic::catch_unwind(AssertUnwindSafe(|| step.execute(ctx))) {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => OperationResult::failed(vec![Fault::operation(&name, format!("{:#}", e))]),
        Err(payload) => OperationResult::failed(vec![Fault::operation(
            &name,
            format!("panicked: {}", panic_message(payload.as_ref())),
        )]),
    };

    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| step.release())) {
        tracing::warn!(
            "Step '{}' panicked while releasing: {}",
            name,
            panic_message(payload.as_ref())
        );
    }
    ctx.record_step(&name);

    match result.status {
        Status::Success => tracing::debug!("Step '{}' succeeded", name),
        _ => tracing::warn!("Step '{}' {} with {} faults", name, result.status, result.faults.len()),
    }
    result
}

/// Run `steps` in order under the context's error policy.
pub(crate) fn run_steps(steps: &mut [Box<dyn Operation>], ctx: &Context) -> OperationResult {
    let mut faults = Vec::new();
    for step in steps.iter_mut() {
        let result = run_step(step.as_mut(), ctx);
        match result.status {
            Status::Success => {}
            Status::Aborted => {
                faults.extend(result.faults);
                return OperationResult::aborted(faults);
            }
            Status::Failed => {
                let keep_going = result.handled || ctx.should_continue(&result.faults);
                faults.extend(result.faults);
                if !keep_going {
                    tracing::warn!("Error policy aborted the run after step '{}'", step.name());
                    return OperationResult::aborted(faults);
                }
            }
        }
    }
    OperationResult::from_faults(faults).handled()
}

// ── Conditional ──

type Predicate = Box<dyn Fn(&Context) -> bool + Send + Sync>;

/// Runs its operation only when the predicate holds at run time. A skipped
/// conditional is a successful no-op.
pub struct Conditional {
    name: String,
    predicate: Predicate,
    then: Box<dyn Operation>,
    otherwise: Option<Box<dyn Operation>>,
}

impl Conditional {
    pub fn new<P, O>(name: impl Into<String>, predicate: P, then: O) -> Self
    where
        P: Fn(&Context) -> bool + Send + Sync + 'static,
        O: Operation + 'static,
    {
        Self {
            name: name.into(),
            predicate: Box::new(predicate),
            then: Box::new(then),
            otherwise: None,
        }
    }

    /// Operation to run when the predicate does not hold.
    pub fn otherwise(mut self, op: impl Operation + 'static) -> Self {
        self.otherwise = Some(Box::new(op));
        self
    }
}

impl Operation for Conditional {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self, ctx: &Context) -> anyhow::Result<OperationResult> {
        if (self.predicate)(ctx) {
            return Ok(run_step(self.then.as_mut(), ctx));
        }
        match self.otherwise.as_mut() {
            Some(op) => Ok(run_step(op.as_mut(), ctx)),
            None => {
                tracing::debug!("Condition of '{}' not met, skipping", self.name);
                Ok(OperationResult::success())
            }
        }
    }
}

// ── DoWhile ──

/// Runs its body once, then again while the predicate holds.
///
/// Each pass is a sequence under the error policy; an abort inside the body
/// ends the loop and the surrounding pipeline.
pub struct DoWhile {
    name: String,
    predicate: Predicate,
    body: Vec<Box<dyn Operation>>,
    max_passes: Option<usize>,
    passes: usize,
}

impl DoWhile {
    pub fn new<P>(name: impl Into<String>, predicate: P) -> Self
    where
        P: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Box::new(predicate),
            body: Vec::new(),
            max_passes: None,
            passes: 0,
        }
    }

    pub fn step(mut self, op: impl Operation + 'static) -> Self {
        self.body.push(Box::new(op));
        self
    }

    /// Stop after `max` passes even if the predicate still holds.
    pub fn max_passes(mut self, max: usize) -> Self {
        self.max_passes = Some(max);
        self
    }

    /// Passes made by the last execution.
    pub fn passes(&self) -> usize {
        self.passes
    }
}

impl Operation for DoWhile {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self, ctx: &Context) -> anyhow::Result<OperationResult> {
        let mut faults: Vec<Fault> = Vec::new();
        self.passes = 0;
        loop {
            self.passes += 1;
            let result = run_steps(&mut self.body, ctx);
            faults.extend(result.faults);
            if result.status == Status::Aborted {
                return Ok(OperationResult::aborted(faults));
            }
            if self.max_passes.is_some_and(|max| self.passes >= max) {
                tracing::debug!("'{}' reached its pass limit", self.name);
                break;
            }
            if !(self.predicate)(ctx) {
                break;
            }
        }
        tracing::debug!("'{}' finished after {} passes", self.name, self.passes);
        Ok(OperationResult::from_faults(faults).handled())
    }
}

// ── Parallel ──

/// Runs independent operations concurrently and waits for all of them.
///
/// Succeeds only if every member succeeded; its faults are the union of the
/// members' faults. Members share the context and must treat it as
/// read-mostly.
pub struct Parallel {
    name: String,
    members: Vec<Box<dyn Operation>>,
}

impl Parallel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
        }
    }

    pub fn member(mut self, op: impl Operation + 'static) -> Self {
        self.members.push(Box::new(op));
        self
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl Operation for Parallel {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self, ctx: &Context) -> anyhow::Result<OperationResult> {
        let results: Vec<OperationResult> = thread::scope(|scope| {
            let handles: Vec<_> = self
                .members
                .iter_mut()
                .map(|op| scope.spawn(move || run_step(op.as_mut(), ctx)))
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|payload| {
                        OperationResult::failed(vec![Fault::operation(
                            "parallel member",
                            format!("panicked: {}", panic_message(payload.as_ref())),
                        )])
                    })
                })
                .collect()
        });

        let aborted = results.iter().any(|r| r.is_aborted());
        let handled = results.iter().all(|r| r.faults.is_empty() || r.handled);
        let faults: Vec<Fault> = results.into_iter().flat_map(|r| r.faults).collect();
        if aborted {
            return Ok(OperationResult::aborted(faults));
        }
        let result = OperationResult::from_faults(faults);
        Ok(if handled { result.handled() } else { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::operation::Task;
    use serde_json::json;

    fn counter(name: &'static str, key: &'static str) -> impl Operation {
        Task::new(name, move |ctx: &Context| {
            ctx.update(key, |v| json!(v.and_then(|v| v.as_i64()).unwrap_or(0) + 1));
            Ok(())
        })
    }

    fn failing(name: &'static str) -> impl Operation {
        Task::new(name, |_ctx: &Context| anyhow::bail!("step failed"))
    }

    fn lenient() -> Context {
        Context::default().with_error_policy(|_, _| true)
    }

    #[test]
    fn test_run_step_converts_errors_and_panics() {
        let ctx = Context::default();
        let mut op = failing("bad");
        let result = run_step(&mut op, &ctx);
        assert_eq!(result.status, Status::Failed);
        assert_eq!(result.faults[0], Fault::operation("bad", "step failed"));

        let mut op = Task::new("panics", |_ctx: &Context| -> anyhow::Result<()> { panic!("oops") });
        let result = run_step(&mut op, &ctx);
        assert_eq!(result.faults[0].message(), "panicked: oops");
        assert_eq!(ctx.executed_steps(), vec!["bad", "panics"]);
    }

    #[test]
    fn test_conditional_skip_is_success() {
        let ctx = Context::default();
        let mut op = Conditional::new("maybe", |ctx| ctx.contains("go"), counter("inc", "n"));
        assert!(op.execute(&ctx).unwrap().is_success());
        assert!(!ctx.contains("n"));

        ctx.set("go", true);
        op.execute(&ctx).unwrap();
        assert_eq!(ctx.get_as::<i64>("n"), Some(1));
    }

    #[test]
    fn test_conditional_otherwise_branch() {
        let ctx = Context::default();
        let mut op = Conditional::new("branch", |_| false, counter("yes", "yes"))
            .otherwise(counter("no", "no"));
        op.execute(&ctx).unwrap();
        assert!(!ctx.contains("yes"));
        assert_eq!(ctx.get_as::<i64>("no"), Some(1));
    }

    #[test]
    fn test_do_while_runs_exactly_m_passes() {
        let ctx = Context::default();
        let mut op = DoWhile::new("loop", |ctx| ctx.get_as::<i64>("n").unwrap_or(0) < 4)
            .step(counter("inc", "n"));
        assert!(op.execute(&ctx).unwrap().is_success());
        assert_eq!(op.passes(), 4);
        assert_eq!(ctx.get_as::<i64>("n"), Some(4));
    }

    #[test]
    fn test_do_while_runs_once_when_predicate_false() {
        let ctx = Context::default();
        let mut op = DoWhile::new("once", |_| false).step(counter("inc", "n"));
        op.execute(&ctx).unwrap();
        assert_eq!(op.passes(), 1);
    }

    #[test]
    fn test_do_while_pass_limit() {
        let ctx = Context::default();
        let mut op = DoWhile::new("forever", |_| true)
            .step(counter("inc", "n"))
            .max_passes(3);
        op.execute(&ctx).unwrap();
        assert_eq!(ctx.get_as::<i64>("n"), Some(3));
    }

    #[test]
    fn test_abort_inside_loop_ends_loop() {
        let ctx = Context::default();
        let mut op = DoWhile::new("loop", |_| true)
            .step(counter("inc", "n"))
            .step(failing("bad"))
            .step(counter("after", "after"));
        let result = op.execute(&ctx).unwrap();
        assert!(result.is_aborted());
        assert_eq!(op.passes(), 1);
        assert!(!ctx.contains("after"));
    }

    #[test]
    fn test_lenient_loop_result_is_handled() {
        let ctx = lenient();
        let mut op = DoWhile::new("loop", |ctx| ctx.get_as::<i64>("n").unwrap_or(0) < 2)
            .step(counter("inc", "n"))
            .step(failing("bad"));
        let result = op.execute(&ctx).unwrap();
        assert_eq!(result.status, Status::Failed);
        assert_eq!(result.faults.len(), 2);
        assert!(result.handled);
    }

    #[test]
    fn test_parallel_unions_faults() {
        let ctx = lenient();
        let mut op = Parallel::new("fan")
            .member(counter("a", "a"))
            .member(failing("b"))
            .member(failing("c"));
        assert_eq!(op.len(), 3);
        let result = op.execute(&ctx).unwrap();
        assert_eq!(result.status, Status::Failed);
        assert_eq!(result.faults.len(), 2);
        assert!(!result.handled);
        assert_eq!(ctx.get_as::<i64>("a"), Some(1));
    }

    #[test]
    fn test_parallel_all_succeed() {
        let ctx = Context::default();
        let mut op = Parallel::new("fan").member(counter("a", "a")).member(counter("b", "b"));
        assert!(op.execute(&ctx).unwrap().is_success());
        assert!(ctx.contains("a") && ctx.contains("b"));
    }

    #[test]
    fn test_run_steps_policy() {
        let mut steps: Vec<Box<dyn Operation>> = vec![
            Box::new(counter("a", "a")),
            Box::new(failing("b")),
            Box::new(counter("c", "c")),
        ];

        let strict = Context::default();
        assert!(run_steps(&mut steps, &strict).is_aborted());
        assert!(!strict.contains("c"));

        let ctx = lenient();
        let result = run_steps(&mut steps, &ctx);
        assert_eq!(result.status, Status::Failed);
        assert!(ctx.contains("c"));
    }
}
