//! Filter: forwards the items a predicate accepts.

use crate::graph::dataflow::Emitter;
use crate::graph::fault::StepResult;
use crate::graph::node::Processor;
use crate::graph::row::NodeOutput;
use std::marker::PhantomData;

/// Forwards a copy of every item for which the predicate returns `true`.
/// A predicate error is an item-scoped failure.
pub struct Filter<T, F> {
    predicate: F,
    passed: u64,
    rejected: u64,
    _payload: PhantomData<fn() -> T>,
}

impl<T, F> Filter<T, F>
where
    T: NodeOutput,
    F: FnMut(&T) -> anyhow::Result<bool> + Send,
{
    pub fn new(predicate: F) -> Self {
        Self {
            predicate,
            passed: 0,
            rejected: 0,
            _payload: PhantomData,
        }
    }

    pub fn passed(&self) -> u64 {
        self.passed
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}

impl<T, F> Processor for Filter<T, F>
where
    T: NodeOutput,
    F: FnMut(&T) -> anyhow::Result<bool> + Send,
{
    type Input = T;
    type Output = T;

    fn process(&mut self, item: &T, out: &mut Emitter<'_, T>) -> StepResult {
        if (self.predicate)(item)? {
            self.passed += 1;
            out.emit_copy(item)?;
        } else {
            self.rejected += 1;
        }
        Ok(())
    }

    fn finish(&mut self, _out: &mut Emitter<'_, T>) -> StepResult {
        tracing::debug!("Filter passed {} and rejected {} items", self.passed, self.rejected);
        Ok(())
    }
}
