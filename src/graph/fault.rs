//! Error taxonomy for node and operation failures.
//!
//! Per-item steps return a tagged [`StepError`]: `Item` failures are
//! recorded and the node moves on to its next item, `Node` failures end the
//! node's loop. Both end up as structured [`Fault`]s in the process result.

use crate::error::EngineError;
use crate::graph::id::NodeInfo;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Outcome of a failed per-item step.
#[derive(Debug)]
pub enum StepError {
    /// Scoped to the current item; processing continues with the next one.
    Item(anyhow::Error),
    /// Escapes the node's loop; the node stops but still signals end.
    Node(anyhow::Error),
}

impl StepError {
    pub fn item(error: impl Into<anyhow::Error>) -> Self {
        StepError::Item(error.into())
    }

    pub fn fatal(error: impl Into<anyhow::Error>) -> Self {
        StepError::Node(error.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, StepError::Node(_))
    }

    pub fn into_inner(self) -> anyhow::Error {
        match self {
            StepError::Item(e) | StepError::Node(e) => e,
        }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepError::Item(e) => write!(f, "item error: {:#}", e),
            StepError::Node(e) => write!(f, "node error: {:#}", e),
        }
    }
}

impl From<anyhow::Error> for StepError {
    fn from(error: anyhow::Error) -> Self {
        StepError::Item(error)
    }
}

impl From<EngineError> for StepError {
    fn from(error: EngineError) -> Self {
        StepError::Item(error.into())
    }
}

/// Result of one per-item step.
pub type StepResult<T = ()> = std::result::Result<T, StepError>;

/// Structured failure record, as returned in process and pipeline results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum Fault {
    /// Raised while processing one item; carries the item's debug rendering.
    Item {
        node: NodeInfo,
        message: String,
        item: Option<String>,
    },
    /// Escaped a node's loop and stopped that node.
    Node { node: NodeInfo, message: String },
    /// Raised by a pipeline step, or a step that returned a failed result.
    Operation { operation: String, message: String },
}

impl Fault {
    pub fn item(node: &NodeInfo, error: &anyhow::Error, item: Option<String>) -> Self {
        Fault::Item {
            node: node.clone(),
            message: format!("{:#}", error),
            item,
        }
    }

    pub fn node(node: &NodeInfo, error: &anyhow::Error) -> Self {
        Fault::Node {
            node: node.clone(),
            message: format!("{:#}", error),
        }
    }

    pub fn operation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Fault::Operation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Fault::Item { message, .. }
            | Fault::Node { message, .. }
            | Fault::Operation { message, .. } => message,
        }
    }

    /// The node this fault belongs to, for node-level faults.
    pub fn node_info(&self) -> Option<&NodeInfo> {
        match self {
            Fault::Item { node, .. } | Fault::Node { node, .. } => Some(node),
            Fault::Operation { .. } => None,
        }
    }

    pub fn is_item(&self) -> bool {
        matches!(self, Fault::Item { .. })
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::Item {
                node,
                message,
                item: Some(item),
            } => write!(f, "[{}] item {}: {}", node, item, message),
            Fault::Item { node, message, .. } => write!(f, "[{}] item: {}", node, message),
            Fault::Node { node, message } => write!(f, "[{}] {}", node, message),
            Fault::Operation { operation, message } => {
                write!(f, "[operation {}] {}", operation, message)
            }
        }
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Receiver of node failures.
///
/// Connector nodes never swallow errors; the engine routes every failure to
/// the node's handler in addition to its own collector.
#[cfg_attr(test, mockall::automock)]
pub trait ErrorHandler: Send + Sync {
    /// A failure that stopped the node.
    fn raise_error(&self, node: &NodeInfo, error: &anyhow::Error);

    /// A failure while processing `item` (its debug rendering).
    fn raise_item_error(&self, node: &NodeInfo, error: &anyhow::Error, item: &str);
}

/// Default handler: keeps every fault in arrival order.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    faults: Mutex<Vec<Fault>>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, fault: Fault) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(fault);
    }

    pub fn len(&self) -> usize {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn take(&self) -> Vec<Fault> {
        std::mem::take(&mut *self.faults.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl ErrorHandler for ErrorCollector {
    fn raise_error(&self, node: &NodeInfo, error: &anyhow::Error) {
        self.push(Fault::node(node, error));
    }

    fn raise_item_error(&self, node: &NodeInfo, error: &anyhow::Error, item: &str) {
        self.push(Fault::item(node, error, Some(item.to_string())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::id::NodeId;
    use anyhow::anyhow;

    fn info() -> NodeInfo {
        NodeInfo::new(NodeId(1), "parser")
    }

    #[test]
    fn test_step_error_conversions() {
        let from_anyhow: StepError = anyhow!("bad value").into();
        assert!(!from_anyhow.is_fatal());

        let from_engine: StepError = EngineError::Frozen("set column").into();
        assert!(!from_engine.is_fatal());
        assert!(from_engine.to_string().contains("frozen"));

        let fatal = StepError::fatal(anyhow!("connection lost"));
        assert!(fatal.is_fatal());
        assert_eq!(fatal.into_inner().to_string(), "connection lost");
    }

    #[test]
    fn test_question_mark_yields_item_error() {
        fn step() -> StepResult {
            let n = "x".parse::<i64>().map_err(anyhow::Error::from)?;
            let _ = n;
            Ok(())
        }
        assert!(matches!(step(), Err(StepError::Item(_))));
    }

    #[test]
    fn test_fault_display() {
        let fault = Fault::item(&info(), &anyhow!("not a number"), Some("{\"n\": \"x\"}".into()));
        assert_eq!(
            fault.to_string(),
            "[parser (1)] item {\"n\": \"x\"}: not a number"
        );
        assert!(fault.is_item());

        let fault = Fault::operation("load", "timeout");
        assert_eq!(fault.to_string(), "[operation load] timeout");
        assert!(fault.node_info().is_none());
    }

    #[test]
    fn test_fault_serializes_with_scope_tag() {
        let fault = Fault::node(&info(), &anyhow!("boom"));
        let json = serde_json::to_value(&fault).unwrap();
        assert_eq!(json["scope"], "node");
        assert_eq!(json["node"]["name"], "parser");
        assert_eq!(json["message"], "boom");
    }

    #[test]
    fn test_panic_message() {
        let caught = std::panic::catch_unwind(|| panic!("row {} broke", 3)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "row 3 broke");
        let caught = std::panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "static");
    }

    #[test]
    fn test_collector_records_in_order() {
        let collector = ErrorCollector::new();
        collector.raise_item_error(&info(), &anyhow!("first"), "row 1");
        collector.raise_error(&info(), &anyhow!("second"));
        assert_eq!(collector.len(), 2);

        let faults = collector.take();
        assert_eq!(faults[0].message(), "first");
        assert!(matches!(faults[1], Fault::Node { .. }));
        assert!(collector.is_empty());
    }
}
