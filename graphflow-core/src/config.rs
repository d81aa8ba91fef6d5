//! Worker Configuration
//!
//! Options for the dedicated thread that drives an isolated streaming node.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Options applied when an isolated node launches its worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerOptions {
    /// Prefix of the worker thread name; the node label is appended.
    pub thread_name_prefix: String,

    /// Stack size of the worker thread in bytes. `None` uses the platform default.
    pub stack_size: Option<usize>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            thread_name_prefix: "graphflow-worker".to_string(),
            stack_size: None,
        }
    }
}

impl WorkerOptions {
    /// Parse options from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub(crate) fn thread_name(&self, label: &str) -> String {
        format!("{}-{}", self.thread_name_prefix, label)
    }
}
