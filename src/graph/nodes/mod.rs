//! Built-in nodes.
//!
//! Generic building blocks over any [`NodeOutput`](crate::graph::NodeOutput)
//! payload. Concrete connectors (files, databases, object storage) live
//! outside the engine and implement the same node traits.

pub mod classifier;
pub mod collector;
pub mod filter;
pub mod memory;
pub mod merge;
pub mod sink;
pub mod sort;
pub mod transform;

pub use classifier::{Accessor, Classifier};
pub use collector::{ResultCollector, ResultHandle};
pub use filter::Filter;
pub use memory::{Generate, MemorySource};
pub use merge::Union;
pub use sink::ForEach;
pub use sort::Sort;
pub use transform::Transform;
