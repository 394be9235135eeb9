//! Sort: buffers the whole stream, then emits it ordered by a key.

use crate::graph::dataflow::Emitter;
use crate::graph::fault::StepResult;
use crate::graph::node::Processor;
use crate::graph::row::NodeOutput;

/// Buffers owned copies until end of input, then emits them in key order.
/// The sort is stable: equal keys keep their arrival order.
pub struct Sort<T, K, F> {
    key: F,
    descending: bool,
    buffer: Vec<(K, T)>,
}

impl<T, K, F> Sort<T, K, F>
where
    T: NodeOutput,
    K: Ord + Send,
    F: FnMut(&T) -> K + Send,
{
    pub fn by_key(key: F) -> Self {
        Self {
            key,
            descending: false,
            buffer: Vec::new(),
        }
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }
}

impl<T, K, F> Processor for Sort<T, K, F>
where
    T: NodeOutput,
    K: Ord + Send,
    F: FnMut(&T) -> K + Send,
{
    type Input = T;
    type Output = T;

    fn process(&mut self, item: &T, _out: &mut Emitter<'_, T>) -> StepResult {
        let mut owned = T::default();
        item.copy_to(&mut owned);
        self.buffer.push(((self.key)(item), owned));
        Ok(())
    }

    fn finish(&mut self, out: &mut Emitter<'_, T>) -> StepResult {
        if self.descending {
            self.buffer.sort_by(|a, b| b.0.cmp(&a.0));
        } else {
            self.buffer.sort_by(|a, b| a.0.cmp(&b.0));
        }
        for (_, item) in self.buffer.drain(..) {
            out.emit_copy(&item)?;
        }
        Ok(())
    }
}
