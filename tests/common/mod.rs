//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use pipeflow::graph::ErrorHandler;
use pipeflow::{EngineConfig, NodeInfo, Row};
use std::sync::Mutex;
use std::time::Duration;

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Rows `{ "number": n }` for `n` in `range`
pub fn number_rows(range: std::ops::RangeInclusive<i64>) -> Vec<Row> {
    range.map(|n| Row::new().with("number", n)).collect()
}

/// The `number` column of each row, in order
pub fn numbers(rows: &[Row]) -> Vec<i64> {
    rows.iter().filter_map(|r| r.get_i64("number")).collect()
}

/// Config with tiny queues so backpressure kicks in quickly
pub fn tight_config(capacity: usize) -> EngineConfig {
    EngineConfig::new().with_queue_capacity(capacity)
}

/// Error handler that records what it was told
#[derive(Debug, Default)]
pub struct RecordingHandler {
    pub node_errors: Mutex<Vec<String>>,
    pub item_errors: Mutex<Vec<(String, String)>>,
}

impl RecordingHandler {
    pub fn item_count(&self) -> usize {
        self.item_errors.lock().unwrap().len()
    }

    pub fn node_count(&self) -> usize {
        self.node_errors.lock().unwrap().len()
    }
}

impl ErrorHandler for RecordingHandler {
    fn raise_error(&self, node: &NodeInfo, error: &anyhow::Error) {
        self.node_errors
            .lock()
            .unwrap()
            .push(format!("{}: {}", node.name, error));
    }

    fn raise_item_error(&self, node: &NodeInfo, error: &anyhow::Error, item: &str) {
        self.item_errors
            .lock()
            .unwrap()
            .push((format!("{}: {}", node.name, error), item.to_string()));
    }
}
