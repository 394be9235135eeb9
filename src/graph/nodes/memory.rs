//! In-memory sources.

use crate::graph::dataflow::Emitter;
use crate::graph::fault::StepResult;
use crate::graph::node::Source;
use crate::graph::row::NodeOutput;
use std::ops::ControlFlow;

/// Emits a copy of each stored item, in order.
pub struct MemorySource<T: NodeOutput> {
    items: Vec<T>,
    next: usize,
}

impl<T: NodeOutput> MemorySource<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: items.into_iter().collect(),
            next: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: NodeOutput> Source for MemorySource<T> {
    type Output = T;

    fn produce(&mut self, out: &mut Emitter<'_, T>) -> StepResult<ControlFlow<()>> {
        let Some(item) = self.items.get(self.next) else {
            return Ok(ControlFlow::Break(()));
        };
        self.next += 1;
        out.emit_copy(item)?;
        Ok(ControlFlow::Continue(()))
    }
}

/// Emits `count` items, each filled in by a closure from its sequence number.
///
/// A closure error is an item-scoped failure; that item is skipped.
pub struct Generate<T, F> {
    count: u64,
    next: u64,
    fill: F,
    _payload: std::marker::PhantomData<fn() -> T>,
}

impl<T, F> Generate<T, F>
where
    T: NodeOutput,
    F: FnMut(u64, &mut T) -> anyhow::Result<()> + Send,
{
    pub fn new(count: u64, fill: F) -> Self {
        Self {
            count,
            next: 0,
            fill,
            _payload: std::marker::PhantomData,
        }
    }
}

impl<T, F> Source for Generate<T, F>
where
    T: NodeOutput,
    F: FnMut(u64, &mut T) -> anyhow::Result<()> + Send,
{
    type Output = T;

    fn produce(&mut self, out: &mut Emitter<'_, T>) -> StepResult<ControlFlow<()>> {
        if self.next >= self.count {
            return Ok(ControlFlow::Break(()));
        }
        let seq = self.next;
        self.next += 1;

        let mut item = out.borrow()?;
        if let Err(e) = (self.fill)(seq, &mut item) {
            out.discard(item);
            return Err(e.context(format!("generating item {}", seq)).into());
        }
        out.emit(item)?;
        Ok(ControlFlow::Continue(()))
    }
}
