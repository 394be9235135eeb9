//! Node contracts.
//!
//! A node is user code with one of four shapes. The process engine owns the
//! loop around it: it feeds items one at a time, recycles consumed items,
//! routes failures and signals end of stream on the node's behalf.
//!
//! # Error scopes
//!
//! Every per-item call returns a [`StepResult`]. `Err(StepError::Item(_))`
//! (what `?` produces) records an item-scoped fault and moves on to the next
//! item. `Err(StepError::Node(_))` records a node-scoped fault and stops the
//! node; its downstream still sees end of stream.

use crate::context::Context;
use crate::graph::dataflow::Emitter;
use crate::graph::fault::StepResult;
use crate::graph::row::NodeOutput;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::ControlFlow;

/// Produces items; consumes none.
pub trait Source: Send {
    type Output: NodeOutput;

    /// Called repeatedly until it returns `ControlFlow::Break`. An item error
    /// skips the current call and the next call follows, provided the call
    /// emitted or discarded something first. An item error from a call that
    /// did neither stops the source as a node error.
    fn produce(&mut self, out: &mut Emitter<'_, Self::Output>) -> StepResult<ControlFlow<()>>;
}

/// Consumes one stream and produces another.
pub trait Processor: Send {
    type Input: NodeOutput;
    type Output: NodeOutput;

    fn process(&mut self, item: &Self::Input, out: &mut Emitter<'_, Self::Output>) -> StepResult;

    /// Called once after the input is exhausted, before end of stream.
    fn finish(&mut self, _out: &mut Emitter<'_, Self::Output>) -> StepResult {
        Ok(())
    }
}

/// Consumes items; produces none.
pub trait Sink: Send {
    type Input: NodeOutput;

    fn consume(&mut self, item: &Self::Input, ctx: &Context) -> StepResult;

    fn finish(&mut self, _ctx: &Context) -> StepResult {
        Ok(())
    }
}

/// Which input of a two-input node an item arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergePort {
    Left,
    Right,
}

impl fmt::Display for MergePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergePort::Left => write!(f, "left"),
            MergePort::Right => write!(f, "right"),
        }
    }
}

/// Consumes two streams of the same type and produces one.
///
/// Items are handed over in order of availability; there is no ordering
/// between the two inputs.
pub trait Merger: Send {
    type Input: NodeOutput;
    type Output: NodeOutput;

    fn merge(
        &mut self,
        port: MergePort,
        item: &Self::Input,
        out: &mut Emitter<'_, Self::Output>,
    ) -> StepResult;

    fn finish(&mut self, _out: &mut Emitter<'_, Self::Output>) -> StepResult {
        Ok(())
    }
}
