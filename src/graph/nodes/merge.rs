//! Union: merges two streams of the same type into one.

use crate::graph::dataflow::Emitter;
use crate::graph::fault::StepResult;
use crate::graph::node::{MergePort, Merger};
use crate::graph::row::NodeOutput;
use std::marker::PhantomData;

/// Forwards every item from either input, interleaved by availability.
pub struct Union<T> {
    left: u64,
    right: u64,
    _payload: PhantomData<fn() -> T>,
}

impl<T: NodeOutput> Union<T> {
    pub fn new() -> Self {
        Self {
            left: 0,
            right: 0,
            _payload: PhantomData,
        }
    }
}

impl<T: NodeOutput> Default for Union<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: NodeOutput> Merger for Union<T> {
    type Input = T;
    type Output = T;

    fn merge(&mut self, port: MergePort, item: &T, out: &mut Emitter<'_, T>) -> StepResult {
        match port {
            MergePort::Left => self.left += 1,
            MergePort::Right => self.right += 1,
        }
        out.emit_copy(item)?;
        Ok(())
    }

    fn finish(&mut self, _out: &mut Emitter<'_, T>) -> StepResult {
        tracing::debug!("Union merged {} left and {} right items", self.left, self.right);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::context::Context;
    use crate::graph::dataflow::Dataflow;
    use crate::graph::id::{NodeId, NodeInfo};
    use crate::graph::row::Row;
    use crate::graph::stats::NodeStats;
    use std::sync::Arc;

    #[test]
    fn test_union_forwards_both_ports() {
        let ctx = Context::default();
        let mut flow = Dataflow::new(
            NodeInfo::new(NodeId(0), "union"),
            Arc::new(NodeStats::new()),
            &EngineConfig::default(),
        );
        let input = flow
            .attach_consumer(NodeInfo::new(NodeId(1), "sink"), Arc::new(NodeStats::new()))
            .unwrap();

        let mut union = Union::<Row>::new();
        {
            let mut out = Emitter::new(&mut flow, &ctx);
            union.merge(MergePort::Left, &Row::new().with("n", 1), &mut out).unwrap();
            union.merge(MergePort::Right, &Row::new().with("n", 2), &mut out).unwrap();
            union.merge(MergePort::Left, &Row::new().with("n", 3), &mut out).unwrap();
            union.finish(&mut out).unwrap();
        }
        flow.signal_end().unwrap();

        let merged: Vec<_> = input.filter_map(|r| r.get_i64("n")).collect();
        assert_eq!(merged, vec![1, 2, 3]);
        assert_eq!((union.left, union.right), (2, 1));
    }
}
