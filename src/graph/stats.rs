//! Per-node counters and the aggregated process statistics.
//!
//! `NodeStats` is shared between a node's own thread and every dataflow
//! adapter that delivers to or from it, so the counters are atomics. They are
//! monotonic for one execution; a new execution gets fresh instances.

use crate::graph::id::{NodeId, NodeInfo};
use crate::graph::port::NodeRole;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Live counters for one node.
#[derive(Debug, Default)]
pub struct NodeStats {
    reads: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
    elapsed_ns: AtomicU64,
}

impl NodeStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_elapsed(&self, elapsed: Duration) {
        let ns = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.elapsed_ns.store(ns, Ordering::Relaxed);
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_ns.load(Ordering::Relaxed))
    }
}

/// Frozen per-node figures after an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReport {
    pub node: NodeInfo,
    pub role: NodeRole,
    pub reads: u64,
    pub writes: u64,
    pub errors: u64,
    pub elapsed: Duration,
}

impl NodeReport {
    pub fn capture(node: NodeInfo, role: NodeRole, stats: &NodeStats) -> Self {
        Self {
            node,
            role,
            reads: stats.reads(),
            writes: stats.writes(),
            errors: stats.errors(),
            elapsed: stats.elapsed(),
        }
    }
}

/// Aggregated statistics of one process execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStats {
    pub nodes: Vec<NodeReport>,
    pub elapsed: Duration,
}

impl ProcessStats {
    pub fn total_reads(&self) -> u64 {
        self.nodes.iter().map(|n| n.reads).sum()
    }

    pub fn total_writes(&self) -> u64 {
        self.nodes.iter().map(|n| n.writes).sum()
    }

    pub fn total_errors(&self) -> u64 {
        self.nodes.iter().map(|n| n.errors).sum()
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.node.id == id)
    }

    pub fn node_by_name(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.node.name == name)
    }

    /// Nodes ordered by elapsed time, fastest first.
    pub fn ranking(&self) -> Vec<&NodeReport> {
        let mut ranked: Vec<_> = self.nodes.iter().collect();
        ranked.sort_by_key(|n| n.elapsed);
        ranked
    }

    pub fn fastest(&self) -> Option<&NodeReport> {
        self.nodes.iter().min_by_key(|n| n.elapsed)
    }

    pub fn slowest(&self) -> Option<&NodeReport> {
        self.nodes.iter().max_by_key(|n| n.elapsed)
    }
}
