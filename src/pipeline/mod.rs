//! Pipeline orchestration.
//!
//! A [`Pipeline`] sequences [`Operation`]s (processes, closures and control
//! constructs) over one shared [`Context`](crate::context::Context):
//!
//! - **[`Task`]**: a closure
//! - **[`ProcessStep`]**: builds and runs a fresh process per execution
//! - **[`Conditional`]**: runs only when a predicate holds
//! - **[`DoWhile`]**: repeats a body while a predicate holds
//! - **[`Parallel`]**: runs independent operations concurrently
//!
//! After a failed step the context's error policy decides whether the run
//! continues or aborts.

pub mod control;
pub mod operation;
pub mod orchestrator;
pub mod report;

pub use control::{Conditional, DoWhile, Parallel};
pub use operation::{Operation, OperationResult, ProcessStep, Status, Task};
pub use orchestrator::Pipeline;
pub use report::PipelineReport;
