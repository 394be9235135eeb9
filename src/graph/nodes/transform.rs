//! Transform: maps each input item onto a fresh output item.

use crate::graph::dataflow::Emitter;
use crate::graph::fault::StepResult;
use crate::graph::node::Processor;
use crate::graph::row::NodeOutput;
use std::marker::PhantomData;

/// Fills a pool-borrowed output from each input. On error the output is
/// returned to the pool and the failure is item-scoped.
pub struct Transform<I, O, F> {
    map: F,
    _payload: PhantomData<fn(I) -> O>,
}

impl<I, O, F> Transform<I, O, F>
where
    I: NodeOutput,
    O: NodeOutput,
    F: FnMut(&I, &mut O) -> anyhow::Result<()> + Send,
{
    pub fn new(map: F) -> Self {
        Self {
            map,
            _payload: PhantomData,
        }
    }
}

impl<I, O, F> Processor for Transform<I, O, F>
where
    I: NodeOutput,
    O: NodeOutput,
    F: FnMut(&I, &mut O) -> anyhow::Result<()> + Send,
{
    type Input = I;
    type Output = O;

    fn process(&mut self, item: &I, out: &mut Emitter<'_, O>) -> StepResult {
        let mut mapped = out.borrow()?;
        if let Err(e) = (self.map)(item, &mut mapped) {
            out.discard(mapped);
            return Err(e.into());
        }
        out.emit(mapped)?;
        Ok(())
    }
}
