//! # pipeflow: concurrent dataflow pipelines
//!
//! A data-pipeline execution engine. Users describe a directed graph of
//! stages (sources that produce records, processing stages that transform a
//! stream, sinks that consume it) and the engine runs every stage on its own
//! thread, connected by bounded queues.
//!
//! ## Architecture
//!
//! - **Records**: [`Row`] and the [`NodeOutput`](graph::NodeOutput) contract
//!   (freeze, reset, copy) every payload satisfies
//! - **Pools**: per-type object pools recycle payload instances on hot paths
//! - **Dataflow**: one producer fans out to many consumers through
//!   crossbeam bounded channels, giving backpressure and in-order delivery
//! - **Process**: one wired graph, executed to completion with aggregated
//!   statistics and structured faults
//! - **Pipeline**: processes and other operations sequenced with
//!   conditional, looped and parallel control flow under an error policy
//!
//! ## Configuration
//!
//! Engine settings live in [`EngineConfig`], loaded from TOML. The default
//! file is `engine.toml` in the platform config directory under
//! `dev.hxyulin.pipeflow`:
//!
//! - **Linux**: `~/.config/dev.hxyulin.pipeflow/`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.pipeflow/`
//! - **Windows**: `%APPDATA%\dev.hxyulin.pipeflow\`
//!
//! ## Example
//!
//! ```ignore
//! use pipeflow::graph::nodes::{Filter, MemorySource};
//! use pipeflow::{Context, Pipeline, Process, ProcessStep, Row};
//!
//! fn main() -> anyhow::Result<()> {
//!     let ctx = Context::default();
//!     let mut pipeline = Pipeline::new("evens").then(ProcessStep::new("filter", |_ctx| {
//!         Ok(Process::builder("filter")
//!             .input("numbers", MemorySource::new((1..=5).map(|n| Row::new().with("number", n))))
//!             .then("even", Filter::new(|row: &Row| Ok(row.get_i64("number").unwrap_or(1) % 2 == 0)))
//!             .complete_with_result()?)
//!     }));
//!
//!     let report = pipeline.run(&ctx)?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod logging;
pub mod pipeline;

pub use config::{EmptyEmitPolicy, EngineConfig, LoggingConfig, PoolConfig};
pub use context::{ConnectionRegistry, Context, ErrorPolicy};
pub use error::{EngineError, Result, ResultExt};
pub use graph::{
    Emitter, ErrorHandler, Fault, Flow, Merger, NodeId, NodeInfo, NodeOutput, Process,
    ProcessBuilder, ProcessResult, ProcessStats, Processor, Row, Sink, Source, StepError,
    StepResult,
};
pub use pipeline::{
    Conditional, DoWhile, Operation, OperationResult, Parallel, Pipeline, PipelineReport,
    ProcessStep, Status, Task,
};
