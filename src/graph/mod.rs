//! Graph runtime.
//!
//! ## Layers
//!
//! - **Records**: [`Row`] and the [`NodeOutput`] contract every payload meets
//! - **Pools**: [`ObjectPool`] / [`PoolRegistry`] recycle payload instances
//! - **Nodes**: [`Source`], [`Processor`], [`Sink`] and [`Merger`] traits
//! - **Dataflow**: [`Dataflow`] binds one producer to its consumers through
//!   bounded queues, duplicating items on fan-out
//! - **Process**: [`ProcessBuilder`] wires a graph, [`Process`] runs each node
//!   on its own thread and aggregates [`ProcessStats`] and [`Fault`]s

pub mod builder;
pub mod dataflow;
pub mod fault;
pub mod gate;
pub mod id;
pub mod node;
pub mod nodes;
pub mod pool;
pub mod port;
pub mod process;
pub mod row;
mod runner;
pub mod stats;

pub use builder::{Flow, ProcessBuilder, RESULTS_NODE};
pub use dataflow::{Dataflow, Emitter, Input};
pub use fault::{ErrorCollector, ErrorHandler, Fault, StepError, StepResult};
pub use gate::Gate;
pub use id::{NodeId, NodeInfo};
pub use node::{MergePort, Merger, Processor, Sink, Source};
pub use pool::{ObjectPool, PoolRegistry, PoolSession, PoolStats};
pub use port::{InputPort, NodeRole};
pub use process::{Process, ProcessResult};
pub use row::{NodeOutput, Row};
pub use stats::{NodeReport, NodeStats, ProcessStats};
