//! Node roles and input ports.
//!
//! Each node declares its role when it is added to a process. The builder
//! uses the role to validate connections: only producers (sources and
//! processing nodes) can feed a dataflow adapter, and only consumers
//! (sinks and processing nodes) can be attached to one.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The part a node plays in a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Produces items, consumes none.
    Source,
    /// Consumes one stream and produces one.
    Processing,
    /// Consumes two streams and produces one.
    Merge,
    /// Consumes items, produces none.
    Sink,
}

impl NodeRole {
    #[inline]
    pub fn produces(self) -> bool {
        !matches!(self, NodeRole::Sink)
    }

    #[inline]
    pub fn consumes(self) -> bool {
        !matches!(self, NodeRole::Source)
    }

    /// Input ports this role must have bound before execution.
    pub fn input_ports(self) -> &'static [InputPort] {
        match self {
            NodeRole::Source => &[],
            NodeRole::Processing | NodeRole::Sink => &[InputPort::Main],
            NodeRole::Merge => &[InputPort::Left, InputPort::Right],
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Source => write!(f, "source"),
            NodeRole::Processing => write!(f, "processing"),
            NodeRole::Merge => write!(f, "merge"),
            NodeRole::Sink => write!(f, "sink"),
        }
    }
}

/// A consumer's input slot. Single-input nodes only have `Main`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputPort {
    Main,
    Left,
    Right,
}

impl InputPort {
    #[inline]
    pub fn index(self) -> usize {
        match self {
            InputPort::Main | InputPort::Left => 0,
            InputPort::Right => 1,
        }
    }
}

impl fmt::Display for InputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputPort::Main => write!(f, "in"),
            InputPort::Left => write!(f, "left"),
            InputPort::Right => write!(f, "right"),
        }
    }
}
