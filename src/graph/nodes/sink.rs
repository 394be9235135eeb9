//! ForEach: runs a closure for every item.

use crate::context::Context;
use crate::graph::fault::StepResult;
use crate::graph::node::Sink;
use crate::graph::row::NodeOutput;
use std::marker::PhantomData;

/// Terminal stage calling `action` per item. An action error is item-scoped.
pub struct ForEach<T, F> {
    action: F,
    _payload: PhantomData<fn(T)>,
}

impl<T, F> ForEach<T, F>
where
    T: NodeOutput,
    F: FnMut(&T, &Context) -> anyhow::Result<()> + Send,
{
    pub fn new(action: F) -> Self {
        Self {
            action,
            _payload: PhantomData,
        }
    }
}

impl<T, F> Sink for ForEach<T, F>
where
    T: NodeOutput,
    F: FnMut(&T, &Context) -> anyhow::Result<()> + Send,
{
    type Input = T;

    fn consume(&mut self, item: &T, ctx: &Context) -> StepResult {
        (self.action)(item, ctx)?;
        Ok(())
    }
}
