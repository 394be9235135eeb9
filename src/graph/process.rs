//! Process engine: runs one fully wired node graph to completion.
//!
//! `execute` gives every node its own scoped thread. Each thread waits on the
//! node's gates, runs the node loop (panics are caught), then always closes
//! the node: its adapter signals end and its inputs are dropped, so a failed
//! node never leaves its neighbours blocked. Once every thread has joined,
//! per-node statistics and faults are aggregated into a [`ProcessResult`].

use crate::config::EngineConfig;
use crate::context::Context;
use crate::error::{EngineError, Result};
use crate::graph::builder::ProcessBuilder;
use crate::graph::fault::{panic_message, ErrorCollector, ErrorHandler, Fault};
use crate::graph::gate::Gate;
use crate::graph::id::NodeInfo;
use crate::graph::nodes::collector::CollectedOutput;
use crate::graph::port::NodeRole;
use crate::graph::runner::{NodeRunner, NodeRuntime};
use crate::graph::stats::{NodeReport, NodeStats, ProcessStats};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::Span;

/// One node of a process together with its wiring state.
pub(crate) struct Slot {
    pub info: NodeInfo,
    pub role: NodeRole,
    pub runner: Option<Box<dyn NodeRunner>>,
    pub stats: Arc<NodeStats>,
    pub handler: Option<Arc<dyn ErrorHandler>>,
    /// Gates this node waits on before running.
    pub waits: Vec<Gate>,
    /// Gates released once this node has finished.
    pub releases: Vec<Gate>,
}

/// Outcome of one process execution.
pub struct ProcessResult {
    pub name: String,
    pub faults: Vec<Fault>,
    pub stats: ProcessStats,
    output: Option<Box<dyn Any + Send>>,
}

impl ProcessResult {
    /// True when no node raised an error.
    pub fn is_success(&self) -> bool {
        self.faults.is_empty()
    }

    /// The collected output, when the graph has a result collector of `T`.
    pub fn output<T: 'static>(&self) -> Option<&[T]> {
        self.output
            .as_ref()?
            .downcast_ref::<Vec<T>>()
            .map(Vec::as_slice)
    }

    /// Take ownership of the collected output.
    pub fn take_output<T: 'static>(&mut self) -> Option<Vec<T>> {
        let output = self.output.take()?;
        match output.downcast::<Vec<T>>() {
            Ok(items) => Some(*items),
            Err(other) => {
                self.output = Some(other);
                None
            }
        }
    }
}

impl std::fmt::Debug for ProcessResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessResult")
            .field("name", &self.name)
            .field("success", &self.is_success())
            .field("faults", &self.faults)
            .field("stats", &self.stats)
            .field("has_output", &self.output.is_some())
            .finish()
    }
}

/// A fully wired, executable node graph. Executes once.
pub struct Process {
    name: String,
    config: EngineConfig,
    slots: Vec<Slot>,
    collector: Option<Arc<dyn CollectedOutput>>,
    executed: bool,
}

impl Process {
    pub fn builder(name: impl Into<String>) -> ProcessBuilder {
        ProcessBuilder::new(name)
    }

    pub(crate) fn new(
        name: String,
        config: EngineConfig,
        slots: Vec<Slot>,
        collector: Option<Arc<dyn CollectedOutput>>,
    ) -> Self {
        Self {
            name,
            config,
            slots,
            collector,
            executed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.slots.iter().map(|s| &s.info)
    }

    pub fn node_count(&self) -> usize {
        self.slots.len()
    }

    pub fn is_executed(&self) -> bool {
        self.executed
    }

    /// Run every node concurrently and wait for all of them.
    ///
    /// Node failures do not make this return `Err`; they are reported in the
    /// result. `Err` is reserved for engine misuse such as a second call.
    pub fn execute(&mut self, ctx: &Context) -> Result<ProcessResult> {
        if self.executed {
            return Err(EngineError::AlreadyExecuted(self.name.clone()));
        }
        self.executed = true;

        let span = tracing::info_span!("process", name = %self.name);
        let _enter = span.enter();
        tracing::info!("Executing process '{}' with {} nodes", self.name, self.slots.len());

        let collector = ErrorCollector::new();
        let started = Instant::now();

        thread::scope(|scope| {
            for slot in &mut self.slots {
                let Some(runner) = slot.runner.take() else {
                    continue;
                };
                let rt = NodeRuntime {
                    info: slot.info.clone(),
                    ctx,
                    stats: slot.stats.clone(),
                    faults: &collector,
                    handler: slot.handler.clone(),
                };
                let waits = std::mem::take(&mut slot.waits);
                let releases = std::mem::take(&mut slot.releases);
                let unblock = releases.clone();
                let span = span.clone();

                let spawned = thread::Builder::new()
                    .name(format!("{}/{}", self.name, slot.info.name))
                    .spawn_scoped(scope, move || run_node(runner, &rt, &waits, &releases, &span));

                // On failure the closure, and the runner in it, is dropped:
                // the node's adapter ends and its inputs disconnect.
                if let Err(e) = spawned {
                    let error = anyhow::Error::new(e).context("failed to spawn node thread");
                    slot.stats.record_error();
                    collector.raise_error(&slot.info, &error);
                    for gate in unblock {
                        gate.release();
                    }
                }
            }
        });

        let stats = ProcessStats {
            nodes: self
                .slots
                .iter()
                .map(|s| NodeReport::capture(s.info.clone(), s.role, &s.stats))
                .collect(),
            elapsed: started.elapsed(),
        };
        let faults = collector.take();
        let output = self.collector.as_ref().map(|c| c.take_any());

        if faults.is_empty() {
            tracing::info!(
                "Process '{}' completed in {:?}: {} reads, {} writes",
                self.name,
                stats.elapsed,
                stats.total_reads(),
                stats.total_writes()
            );
        } else {
            tracing::warn!(
                "Process '{}' completed in {:?} with {} errors",
                self.name,
                stats.elapsed,
                faults.len()
            );
        }
        if let (Some(fastest), Some(slowest)) = (stats.fastest(), stats.slowest()) {
            tracing::debug!(
                "Fastest node {} ({:?}), slowest node {} ({:?})",
                fastest.node,
                fastest.elapsed,
                slowest.node,
                slowest.elapsed
            );
        }

        Ok(ProcessResult {
            name: self.name.clone(),
            faults,
            stats,
            output,
        })
    }

    /// Execute standalone with a fresh context built from the process config,
    /// managing the pools around the run.
    pub fn run(mut self) -> Result<ProcessResult> {
        let ctx = Context::new(self.config.clone());
        let _pools = ctx.pools().session()?;
        self.execute(&ctx)
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("name", &self.name)
            .field("nodes", &self.nodes().collect::<Vec<_>>())
            .field("executed", &self.executed)
            .finish()
    }
}

fn run_node(
    mut runner: Box<dyn NodeRunner>,
    rt: &NodeRuntime<'_>,
    waits: &[Gate],
    releases: &[Gate],
    span: &Span,
) {
    let _enter = span.enter();
    for gate in waits {
        gate.wait();
    }

    let started = Instant::now();
    tracing::debug!("{} started", rt.info);
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| runner.run(rt))) {
        rt.node_error(anyhow::anyhow!("panicked: {}", panic_message(payload.as_ref())));
    }
    runner.close();
    drop(runner);
    rt.stats.set_elapsed(started.elapsed());
    tracing::debug!("{} finished in {:?}", rt.info, rt.stats.elapsed());

    for gate in releases {
        gate.release();
    }
}
