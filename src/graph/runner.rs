//! Type-erased node runners.
//!
//! The process graph is assembled at run time from nodes of different
//! payload types, so each node is wrapped in a runner that hides its types
//! behind [`NodeRunner`]. Wiring goes through [`AnyDataflow`] and a downcast
//! to the consumer's expected `Dataflow<T>`; a failed downcast is a payload
//! mismatch.

use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::graph::dataflow::{AnyDataflow, Dataflow, Emitter, Input};
use crate::graph::fault::{ErrorCollector, ErrorHandler, StepError, StepResult};
use crate::graph::id::NodeInfo;
use crate::graph::node::{MergePort, Merger, Processor, Sink, Source};
use crate::graph::pool::{short_type_name, ObjectPool};
use crate::graph::port::{InputPort, NodeRole};
use crate::graph::row::NodeOutput;
use crate::graph::stats::NodeStats;
use crossbeam_channel::Select;
use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

/// Everything a running node needs besides itself.
pub(crate) struct NodeRuntime<'a> {
    pub info: NodeInfo,
    pub ctx: &'a Context,
    pub stats: Arc<NodeStats>,
    pub faults: &'a ErrorCollector,
    pub handler: Option<Arc<dyn ErrorHandler>>,
}

impl NodeRuntime<'_> {
    pub fn item_error(&self, error: anyhow::Error, item: &str) {
        self.stats.record_error();
        tracing::debug!("{} failed on {}: {:#}", self.info, item, error);
        self.faults.raise_item_error(&self.info, &error, item);
        if let Some(handler) = &self.handler {
            handler.raise_item_error(&self.info, &error, item);
        }
    }

    pub fn node_error(&self, error: anyhow::Error) {
        self.stats.record_error();
        tracing::warn!("{} stopped: {:#}", self.info, error);
        self.faults.raise_error(&self.info, &error);
        if let Some(handler) = &self.handler {
            handler.raise_error(&self.info, &error);
        }
    }

    /// Route a per-item outcome. Returns `false` when the node must stop.
    pub fn settle(&self, result: StepResult, item: &dyn fmt::Debug) -> bool {
        match result {
            Ok(()) => true,
            Err(StepError::Item(e)) => {
                self.item_error(e, &format!("{:?}", item));
                true
            }
            Err(StepError::Node(e)) => {
                self.node_error(e);
                false
            }
        }
    }

    fn finish(&self, result: StepResult) {
        if let Err(e) = result {
            self.node_error(e.into_inner());
        }
    }
}

fn recycle<T: NodeOutput>(pool: Option<&Arc<ObjectPool<T>>>, item: Box<T>) {
    if let Some(pool) = pool {
        // Only fails if the pool was torn down mid-run; the item is dropped.
        let _ = pool.recycle(item);
    }
}

fn attach<T: NodeOutput>(
    upstream: &mut dyn AnyDataflow,
    consumer: NodeInfo,
    stats: Arc<NodeStats>,
) -> Result<Input<T>> {
    let produced = upstream.payload_type();
    let from = upstream.producer().name.clone();
    match upstream.as_any_mut().downcast_mut::<Dataflow<T>>() {
        Some(flow) => flow.attach_consumer(consumer, stats),
        None => Err(EngineError::PayloadMismatch {
            from,
            to: consumer.name,
            produced,
            expected: short_type_name::<T>(),
        }),
    }
}

fn end_stream<T: NodeOutput>(output: &mut Dataflow<T>) {
    if let Err(e) = output.signal_end() {
        tracing::debug!("{}", e);
    }
}

pub(crate) trait NodeRunner: Send {
    fn role(&self) -> NodeRole;

    fn input_type(&self) -> Option<&'static str>;

    fn output(&mut self) -> Option<&mut dyn AnyDataflow>;

    fn consumer_count(&self) -> usize;

    fn is_bound(&self, port: InputPort) -> bool;

    fn bind(
        &mut self,
        port: InputPort,
        upstream: &mut dyn AnyDataflow,
        consumer: NodeInfo,
        stats: Arc<NodeStats>,
    ) -> Result<()>;

    /// The node's loop. Returns when input is exhausted, the source breaks,
    /// or a node-scoped error occurs.
    fn run(&mut self, rt: &NodeRuntime<'_>);

    /// Signal end downstream and let go of the inputs. Always called once,
    /// even after a panic in `run`.
    fn close(&mut self);
}

fn port_error(consumer: &NodeInfo, port: InputPort) -> EngineError {
    EngineError::InvalidPort {
        node: consumer.name.clone(),
        port: port.to_string(),
    }
}

// ── Source ──

pub(crate) struct SourceRunner<S: Source> {
    node: S,
    output: Dataflow<S::Output>,
}

impl<S: Source> SourceRunner<S> {
    pub fn new(node: S, output: Dataflow<S::Output>) -> Self {
        Self { node, output }
    }
}

impl<S: Source> NodeRunner for SourceRunner<S> {
    fn role(&self) -> NodeRole {
        NodeRole::Source
    }

    fn input_type(&self) -> Option<&'static str> {
        None
    }

    fn output(&mut self) -> Option<&mut dyn AnyDataflow> {
        Some(&mut self.output)
    }

    fn consumer_count(&self) -> usize {
        self.output.consumer_count()
    }

    fn is_bound(&self, _port: InputPort) -> bool {
        false
    }

    fn bind(&mut self, port: InputPort, _: &mut dyn AnyDataflow, consumer: NodeInfo, _: Arc<NodeStats>) -> Result<()> {
        Err(port_error(&consumer, port))
    }

    fn run(&mut self, rt: &NodeRuntime<'_>) {
        self.output.bind_pool(rt.ctx.pools().active::<S::Output>());
        let mut out = Emitter::new(&mut self.output, rt.ctx);
        let mut call = 0u64;
        loop {
            call += 1;
            let before = out.handled();
            match self.node.produce(&mut out) {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => break,
                // Calling again would fail the same way forever.
                Err(StepError::Item(e)) if out.handled() == before => {
                    rt.node_error(e.context(format!("no progress on call #{}", call)));
                    break;
                }
                Err(StepError::Item(e)) => rt.item_error(e, &format!("call #{}", call)),
                Err(StepError::Node(e)) => {
                    rt.node_error(e);
                    break;
                }
            }
        }
    }

    fn close(&mut self) {
        end_stream(&mut self.output);
    }
}

// ── Processor ──

pub(crate) struct ProcessorRunner<P: Processor> {
    node: P,
    input: Option<Input<P::Input>>,
    output: Dataflow<P::Output>,
}

impl<P: Processor> ProcessorRunner<P> {
    pub fn new(node: P, output: Dataflow<P::Output>) -> Self {
        Self {
            node,
            input: None,
            output,
        }
    }
}

impl<P: Processor> NodeRunner for ProcessorRunner<P> {
    fn role(&self) -> NodeRole {
        NodeRole::Processing
    }

    fn input_type(&self) -> Option<&'static str> {
        Some(short_type_name::<P::Input>())
    }

    fn output(&mut self) -> Option<&mut dyn AnyDataflow> {
        Some(&mut self.output)
    }

    fn consumer_count(&self) -> usize {
        self.output.consumer_count()
    }

    fn is_bound(&self, _port: InputPort) -> bool {
        self.input.is_some()
    }

    fn bind(
        &mut self,
        port: InputPort,
        upstream: &mut dyn AnyDataflow,
        consumer: NodeInfo,
        stats: Arc<NodeStats>,
    ) -> Result<()> {
        if port != InputPort::Main {
            return Err(port_error(&consumer, port));
        }
        self.input = Some(attach(upstream, consumer, stats)?);
        Ok(())
    }

    fn run(&mut self, rt: &NodeRuntime<'_>) {
        let Some(input) = self.input.as_mut() else {
            return;
        };
        input.ready().wait();
        let pool = rt.ctx.pools().active::<P::Input>();
        self.output.bind_pool(rt.ctx.pools().active::<P::Output>());
        let mut out = Emitter::new(&mut self.output, rt.ctx);

        for item in input.by_ref() {
            let outcome = self.node.process(&item, &mut out);
            let keep_going = rt.settle(outcome, &*item);
            recycle(pool.as_ref(), item);
            if !keep_going {
                return;
            }
        }
        rt.finish(self.node.finish(&mut out));
    }

    fn close(&mut self) {
        self.input = None;
        end_stream(&mut self.output);
    }
}

// ── Sink ──

pub(crate) struct SinkRunner<K: Sink> {
    node: K,
    input: Option<Input<K::Input>>,
}

impl<K: Sink> SinkRunner<K> {
    pub fn new(node: K) -> Self {
        Self { node, input: None }
    }
}

impl<K: Sink> NodeRunner for SinkRunner<K> {
    fn role(&self) -> NodeRole {
        NodeRole::Sink
    }

    fn input_type(&self) -> Option<&'static str> {
        Some(short_type_name::<K::Input>())
    }

    fn output(&mut self) -> Option<&mut dyn AnyDataflow> {
        None
    }

    fn consumer_count(&self) -> usize {
        0
    }

    fn is_bound(&self, _port: InputPort) -> bool {
        self.input.is_some()
    }

    fn bind(
        &mut self,
        port: InputPort,
        upstream: &mut dyn AnyDataflow,
        consumer: NodeInfo,
        stats: Arc<NodeStats>,
    ) -> Result<()> {
        if port != InputPort::Main {
            return Err(port_error(&consumer, port));
        }
        self.input = Some(attach(upstream, consumer, stats)?);
        Ok(())
    }

    fn run(&mut self, rt: &NodeRuntime<'_>) {
        let Some(input) = self.input.as_mut() else {
            return;
        };
        input.ready().wait();
        let pool = rt.ctx.pools().active::<K::Input>();

        for item in input.by_ref() {
            let outcome = self.node.consume(&item, rt.ctx);
            let keep_going = rt.settle(outcome, &*item);
            recycle(pool.as_ref(), item);
            if !keep_going {
                return;
            }
        }
        rt.finish(self.node.finish(rt.ctx));
    }

    fn close(&mut self) {
        self.input = None;
    }
}

// ── Merger ──

pub(crate) struct MergerRunner<M: Merger> {
    node: M,
    left: Option<Input<M::Input>>,
    right: Option<Input<M::Input>>,
    output: Dataflow<M::Output>,
}

impl<M: Merger> MergerRunner<M> {
    pub fn new(node: M, output: Dataflow<M::Output>) -> Self {
        Self {
            node,
            left: None,
            right: None,
            output,
        }
    }
}

/// Next item from whichever input has one, until both are exhausted.
fn next_merged<T>(
    left: &mut Option<Input<T>>,
    right: &mut Option<Input<T>>,
) -> Option<(MergePort, Box<T>)> {
    loop {
        let (port, received) = match (left.as_ref(), right.as_ref()) {
            (None, None) => return None,
            (Some(l), None) => (MergePort::Left, l.receiver().recv()),
            (None, Some(r)) => (MergePort::Right, r.receiver().recv()),
            (Some(l), Some(r)) => {
                let mut select = Select::new();
                let left_index = select.recv(l.receiver());
                select.recv(r.receiver());
                let op = select.select();
                if op.index() == left_index {
                    (MergePort::Left, op.recv(l.receiver()))
                } else {
                    (MergePort::Right, op.recv(r.receiver()))
                }
            }
        };
        match received {
            Ok(item) => return Some((port, item)),
            Err(_) => match port {
                MergePort::Left => *left = None,
                MergePort::Right => *right = None,
            },
        }
    }
}

impl<M: Merger> NodeRunner for MergerRunner<M> {
    fn role(&self) -> NodeRole {
        NodeRole::Merge
    }

    fn input_type(&self) -> Option<&'static str> {
        Some(short_type_name::<M::Input>())
    }

    fn output(&mut self) -> Option<&mut dyn AnyDataflow> {
        Some(&mut self.output)
    }

    fn consumer_count(&self) -> usize {
        self.output.consumer_count()
    }

    fn is_bound(&self, port: InputPort) -> bool {
        match port {
            InputPort::Left => self.left.is_some(),
            InputPort::Right => self.right.is_some(),
            InputPort::Main => self.left.is_some() && self.right.is_some(),
        }
    }

    fn bind(
        &mut self,
        port: InputPort,
        upstream: &mut dyn AnyDataflow,
        consumer: NodeInfo,
        stats: Arc<NodeStats>,
    ) -> Result<()> {
        let slot = match port {
            InputPort::Left => &mut self.left,
            InputPort::Right => &mut self.right,
            InputPort::Main => return Err(port_error(&consumer, port)),
        };
        *slot = Some(attach(upstream, consumer, stats)?);
        Ok(())
    }

    fn run(&mut self, rt: &NodeRuntime<'_>) {
        // No start-gate wait here: with two inputs, waiting on one producer
        // could stall the other behind a full queue.
        let pool = rt.ctx.pools().active::<M::Input>();
        self.output.bind_pool(rt.ctx.pools().active::<M::Output>());
        let mut out = Emitter::new(&mut self.output, rt.ctx);

        while let Some((port, item)) = next_merged(&mut self.left, &mut self.right) {
            let outcome = self.node.merge(port, &item, &mut out);
            let keep_going = rt.settle(outcome, &*item);
            recycle(pool.as_ref(), item);
            if !keep_going {
                return;
            }
        }
        rt.finish(self.node.finish(&mut out));
    }

    fn close(&mut self) {
        self.left = None;
        self.right = None;
        end_stream(&mut self.output);
    }
}
