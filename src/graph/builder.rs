//! Graph construction.
//!
//! [`ProcessBuilder`] registers nodes, wires producers to consumers and
//! validates the graph before handing out a [`Process`]. Every producer gets
//! its dataflow adapter when it is added; `connect` attaches the consumer to
//! it, checking roles, ports and payload types.
//!
//! [`Flow`] is the fluent front end for straight-line graphs:
//!
//! ```ignore
//! let process = Process::builder("evens")
//!     .input("numbers", MemorySource::new(rows))
//!     .then("even", Filter::new(|row: &Row| Ok(row.get_i64("number").unwrap_or(1) % 2 == 0)))
//!     .complete_with_result()?;
//! ```

use crate::config::{EmptyEmitPolicy, EngineConfig};
use crate::error::{EngineError, Result};
use crate::graph::dataflow::Dataflow;
use crate::graph::fault::ErrorHandler;
use crate::graph::gate::Gate;
use crate::graph::id::{NodeId, NodeInfo};
use crate::graph::node::{Merger, Processor, Sink, Source};
use crate::graph::nodes::collector::{CollectedOutput, ResultCollector, ResultHandle};
use crate::graph::port::{InputPort, NodeRole};
use crate::graph::process::{Process, Slot};
use crate::graph::row::NodeOutput;
use crate::graph::runner::{MergerRunner, NodeRunner, ProcessorRunner, SinkRunner, SourceRunner};
use crate::graph::stats::NodeStats;
use std::marker::PhantomData;
use std::sync::Arc;

/// Name given to the node added by [`ProcessBuilder::collect_results`].
pub const RESULTS_NODE: &str = "results";

/// Builds a [`Process`].
pub struct ProcessBuilder {
    name: String,
    config: EngineConfig,
    slots: Vec<Slot>,
    /// Data connections, as (producer, consumer).
    edges: Vec<(NodeId, NodeId)>,
    /// Gate dependencies, as (finished, waiting).
    gates: Vec<(NodeId, NodeId)>,
    collector: Option<Arc<dyn CollectedOutput>>,
}

impl ProcessBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, EngineConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: EngineConfig) -> Self {
        Self {
            name: name.into(),
            config,
            slots: Vec::new(),
            edges: Vec::new(),
            gates: Vec::new(),
            collector: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Nodes ──

    fn push<F>(&mut self, name: impl Into<String>, role: NodeRole, make: F) -> NodeId
    where
        F: FnOnce(&NodeInfo, &Arc<NodeStats>, &EngineConfig) -> Box<dyn NodeRunner>,
    {
        let id = NodeId(self.slots.len() as u32);
        let info = NodeInfo::new(id, name);
        let stats = Arc::new(NodeStats::new());
        let runner = make(&info, &stats, &self.config);
        tracing::debug!("Process '{}': added {} node {}", self.name, role, info);
        self.slots.push(Slot {
            info,
            role,
            runner: Some(runner),
            stats,
            handler: None,
            waits: Vec::new(),
            releases: Vec::new(),
        });
        id
    }

    pub fn add_source<S: Source + 'static>(&mut self, name: impl Into<String>, node: S) -> NodeId {
        self.push(name, NodeRole::Source, |info, stats, config| {
            Box::new(SourceRunner::new(node, Dataflow::new(info.clone(), stats.clone(), config)))
        })
    }

    pub fn add_processor<P: Processor + 'static>(&mut self, name: impl Into<String>, node: P) -> NodeId {
        self.push(name, NodeRole::Processing, |info, stats, config| {
            Box::new(ProcessorRunner::new(node, Dataflow::new(info.clone(), stats.clone(), config)))
        })
    }

    pub fn add_sink<K: Sink + 'static>(&mut self, name: impl Into<String>, node: K) -> NodeId {
        self.push(name, NodeRole::Sink, |_, _, _| Box::new(SinkRunner::new(node)))
    }

    pub fn add_merger<M: Merger + 'static>(&mut self, name: impl Into<String>, node: M) -> NodeId {
        self.push(name, NodeRole::Merge, |info, stats, config| {
            Box::new(MergerRunner::new(node, Dataflow::new(info.clone(), stats.clone(), config)))
        })
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeInfo> {
        self.slots.get(id.index()).map(|s| &s.info)
    }

    /// First node registered under `name`.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.slots.iter().find(|s| s.info.name == name).map(|s| s.info.id)
    }

    pub fn node_count(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, id: NodeId) -> Result<&Slot> {
        self.slots
            .get(id.index())
            .ok_or_else(|| EngineError::UnknownNode(format!("{:?}", id)))
    }

    fn slot_mut(&mut self, id: NodeId) -> Result<&mut Slot> {
        self.slots
            .get_mut(id.index())
            .ok_or_else(|| EngineError::UnknownNode(format!("{:?}", id)))
    }

    // ── Wiring ──

    /// Connect `from`'s output to `to`. Two-input nodes take their left
    /// input first, then their right.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        let target = self.slot(to)?;
        let port = match (target.role, target.runner.as_ref()) {
            (NodeRole::Merge, Some(runner)) if runner.is_bound(InputPort::Left) => InputPort::Right,
            (NodeRole::Merge, _) => InputPort::Left,
            _ => InputPort::Main,
        };
        self.connect_port(from, to, port)
    }

    /// Connect `from`'s output to a specific input port of `to`.
    pub fn connect_port(&mut self, from: NodeId, to: NodeId, port: InputPort) -> Result<()> {
        let producer = self.slot(from)?;
        if !producer.role.produces() {
            return Err(EngineError::NotAProducer(producer.info.name.clone()));
        }
        let consumer = self.slot(to)?;
        if !consumer.role.consumes() {
            return Err(EngineError::NotAConsumer(consumer.info.name.clone()));
        }
        if !consumer.role.input_ports().contains(&port) {
            return Err(EngineError::InvalidPort {
                node: consumer.info.name.clone(),
                port: port.to_string(),
            });
        }
        if from == to {
            return Err(EngineError::Cycle(consumer.info.name.clone()));
        }

        let (producer, consumer) = pair_mut(&mut self.slots, from.index(), to.index());
        let upstream = match producer.runner.as_mut().and_then(|r| r.output()) {
            Some(flow) => flow,
            None => return Err(EngineError::NotAProducer(producer.info.name.clone())),
        };
        let Some(runner) = consumer.runner.as_mut() else {
            return Err(EngineError::UnknownNode(consumer.info.name.clone()));
        };
        if runner.is_bound(port) {
            return Err(EngineError::InputAlreadyBound {
                node: consumer.info.name.clone(),
                port: port.to_string(),
            });
        }
        runner.bind(port, upstream, consumer.info.clone(), consumer.stats.clone())?;

        tracing::debug!(
            "Process '{}': connected {} -> {} ({})",
            self.name,
            producer.info,
            consumer.info,
            port
        );
        self.edges.push((from, to));
        Ok(())
    }

    /// Attach a result collector to `from`; its output becomes the process
    /// result payload.
    pub fn collect_results<T: NodeOutput>(&mut self, from: NodeId) -> Result<ResultHandle<T>> {
        let (sink, handle) = ResultCollector::<T>::new();
        let id = self.add_sink(RESULTS_NODE, sink);
        self.connect(from, id)?;
        self.collector = Some(Arc::new(handle.clone()));
        Ok(handle)
    }

    /// Route `node`'s failures to `handler` as well as to the process result.
    pub fn with_error_handler(&mut self, node: NodeId, handler: Arc<dyn ErrorHandler>) -> Result<()> {
        self.slot_mut(node)?.handler = Some(handler);
        Ok(())
    }

    /// Hold `node` back until `finished` has completed.
    ///
    /// A waiting node does not drain its queue, so `build` rejects gates
    /// where `finished` depends on anything that feeds `node`.
    pub fn block_until_finished(&mut self, node: NodeId, finished: NodeId) -> Result<()> {
        self.slot(node)?;
        self.slot(finished)?;
        if node == finished {
            return Err(EngineError::Cycle(self.slot(node)?.info.name.clone()));
        }
        let gate = Gate::new();
        self.slot_mut(node)?.waits.push(gate.clone());
        self.slot_mut(finished)?.releases.push(gate);
        self.gates.push((finished, node));
        Ok(())
    }

    // ── Validation ──

    fn check_acyclic(&self) -> Result<()> {
        let n = self.slots.len();
        let mut indegree = vec![0usize; n];
        for &(_, to) in self.edges.iter().chain(&self.gates) {
            indegree[to.index()] += 1;
        }
        let mut ready: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut visited = 0;
        while let Some(i) = ready.pop() {
            visited += 1;
            for &(from, to) in self.edges.iter().chain(&self.gates) {
                if from.index() == i {
                    indegree[to.index()] -= 1;
                    if indegree[to.index()] == 0 {
                        ready.push(to.index());
                    }
                }
            }
        }
        if visited == n {
            return Ok(());
        }
        let stuck = (0..n).find(|&i| indegree[i] > 0).unwrap_or(0);
        Err(EngineError::Cycle(self.slots[stuck].info.name.clone()))
    }

    /// `node` and everything it depends on. Gate edges are followed only
    /// when `through_gates` is set.
    fn upstream_of(&self, node: NodeId, through_gates: bool) -> Vec<bool> {
        let mut seen = vec![false; self.slots.len()];
        let mut pending = vec![node];
        while let Some(id) = pending.pop() {
            if std::mem::replace(&mut seen[id.index()], true) {
                continue;
            }
            let gates: &[(NodeId, NodeId)] = if through_gates { &self.gates } else { &[] };
            for &(before, after) in self.edges.iter().chain(gates) {
                if after == id && !seen[before.index()] {
                    pending.push(before);
                }
            }
        }
        seen
    }

    /// A gated node stops draining its queue, which in turn stalls every
    /// producer that feeds it. The gate can only open if the node it waits
    /// for depends on none of them.
    fn check_gates(&self) -> Result<()> {
        for &(finished, waiting) in &self.gates {
            let stalled = self.upstream_of(waiting, false);
            let needed = self.upstream_of(finished, true);
            if let Some(shared) = (0..self.slots.len()).find(|&i| stalled[i] && needed[i]) {
                tracing::debug!(
                    "Process '{}': {} waits on {} but both depend on {}",
                    self.name,
                    self.slots[waiting.index()].info,
                    self.slots[finished.index()].info,
                    self.slots[shared].info
                );
                return Err(EngineError::Cycle(self.slots[waiting.index()].info.name.clone()));
            }
        }
        Ok(())
    }

    /// Validate the graph and produce the executable process.
    pub fn build(self) -> Result<Process> {
        for slot in &self.slots {
            let Some(runner) = slot.runner.as_ref() else {
                return Err(EngineError::UnknownNode(slot.info.name.clone()));
            };
            for &port in slot.role.input_ports() {
                if !runner.is_bound(port) {
                    return Err(EngineError::UnboundInput {
                        node: slot.info.name.clone(),
                        port: port.to_string(),
                    });
                }
            }
            if self.config.empty_emit == EmptyEmitPolicy::Error
                && slot.role.produces()
                && runner.consumer_count() == 0
            {
                return Err(EngineError::NoConsumers(slot.info.name.clone()));
            }
        }
        self.check_acyclic()?;
        self.check_gates()?;

        tracing::debug!(
            "Process '{}' built: {} nodes, {} edges, {} gates",
            self.name,
            self.slots.len(),
            self.edges.len(),
            self.gates.len()
        );
        Ok(Process::new(self.name, self.config, self.slots, self.collector))
    }

    // ── Fluent entry ──

    /// Start a straight-line flow at `source`.
    pub fn input<S: Source + 'static>(mut self, name: impl Into<String>, source: S) -> Flow<S::Output> {
        let tail = self.add_source(name, source);
        Flow {
            builder: self,
            tail,
            error: None,
            _payload: PhantomData,
        }
    }
}

fn pair_mut<T>(items: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    if a < b {
        let (left, right) = items.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = items.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}

/// A straight-line graph under construction whose last stage emits `T`.
///
/// Wiring errors are kept and reported by the completing call.
pub struct Flow<T: NodeOutput> {
    builder: ProcessBuilder,
    tail: NodeId,
    error: Option<EngineError>,
    _payload: PhantomData<fn() -> T>,
}

impl<T: NodeOutput> Flow<T> {
    /// Append a processing stage.
    pub fn then<P>(mut self, name: impl Into<String>, node: P) -> Flow<P::Output>
    where
        P: Processor<Input = T> + 'static,
    {
        let id = self.builder.add_processor(name, node);
        let mut error = self.error;
        if error.is_none() {
            error = self.builder.connect(self.tail, id).err();
        }
        Flow {
            builder: self.builder,
            tail: id,
            error,
            _payload: PhantomData,
        }
    }

    /// The node currently at the end of the flow.
    pub fn tail(&self) -> NodeId {
        self.tail
    }

    /// End the flow in `sink`.
    pub fn complete<K>(mut self, name: impl Into<String>, sink: K) -> Result<Process>
    where
        K: Sink<Input = T> + 'static,
    {
        if let Some(e) = self.error {
            return Err(e);
        }
        let id = self.builder.add_sink(name, sink);
        self.builder.connect(self.tail, id)?;
        self.builder.build()
    }

    /// End the flow in a result collector; the collected items become the
    /// process result payload.
    pub fn complete_with_result(mut self) -> Result<Process> {
        if let Some(e) = self.error {
            return Err(e);
        }
        self.builder.collect_results::<T>(self.tail)?;
        self.builder.build()
    }

    /// Leave the fluent API to add branches by hand.
    pub fn into_builder(self) -> Result<(ProcessBuilder, NodeId)> {
        match self.error {
            Some(e) => Err(e),
            None => Ok((self.builder, self.tail)),
        }
    }
}
