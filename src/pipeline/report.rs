//! Run reports.

use crate::error::{EngineError, Result};
use crate::graph::fault::Fault;
use crate::pipeline::operation::Status;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Structured outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub status: Status,
    pub faults: Vec<Fault>,
    /// Executed steps in completion order, nested steps included.
    pub steps: Vec<String>,
}

impl PipelineReport {
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn is_aborted(&self) -> bool {
        self.status == Status::Aborted
    }

    /// Whether a step with this name ran.
    pub fn executed(&self, step: &str) -> bool {
        self.steps.iter().any(|s| s == step)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| EngineError::Serialization(e.to_string()))
    }

    /// One line for logs.
    pub fn summary(&self) -> String {
        format!(
            "Pipeline '{}' {} in {:?}: {} steps, {} faults",
            self.name,
            self.status,
            self.elapsed,
            self.steps.len(),
            self.faults.len()
        )
    }
}
