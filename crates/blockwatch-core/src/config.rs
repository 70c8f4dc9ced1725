//! Configuration types for blockwatch.
//!
//! A config file describes a node graph, built in order:
//!
//! ```json
//! {
//!   "events": { "capacity": 256 },
//!   "nodes": [
//!     { "driver": "memory", "node-name": "disk0", "size": 67108864 },
//!     { "driver": "write-threshold", "node-name": "wt0", "file": "disk0",
//!       "options": { "write-threshold": 50331648 } }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use blockwatch_threshold::MAX_EVENT_CAPACITY;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{error::ControlError, Result};

/// Top-level blockwatch configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BlockwatchConfig {
    /// Event bus settings.
    pub events: EventConfig,

    /// Nodes to create, children before the filters that wrap them.
    pub nodes: Vec<NodeConfig>,
}

/// Event bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventConfig {
    /// Events buffered per subscriber before slow subscribers lag.
    pub capacity: usize,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

/// One node of the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "kebab-case")]
pub enum NodeConfig {
    /// Sparse in-memory disk, optionally with a device-attached threshold.
    #[serde(rename_all = "kebab-case")]
    Memory {
        /// Node name.
        node_name: String,
        /// Device size in bytes.
        size: u64,
        /// Device-attached threshold in bytes, `0` for none.
        #[serde(default)]
        write_threshold: u64,
    },

    /// `write-threshold` filter over an existing node.
    #[serde(rename_all = "kebab-case")]
    WriteThreshold {
        /// Node name.
        node_name: String,
        /// Name of the child node.
        file: String,
        /// Filter options, e.g. `{"write-threshold": 1048576}`.
        #[serde(default)]
        options: Map<String, Value>,
    },
}

impl NodeConfig {
    /// Name of the node this entry creates.
    #[must_use]
    pub fn node_name(&self) -> &str {
        match self {
            Self::Memory { node_name, .. } | Self::WriteThreshold { node_name, .. } => node_name,
        }
    }
}

impl BlockwatchConfig {
    /// Loads and validates a JSON config file.
    ///
    /// # Errors
    ///
    /// [`ControlError::Io`] if the file cannot be read,
    /// [`ControlError::Json`] if it does not parse, and
    /// [`ControlError::Config`] if it fails [`validate`](Self::validate).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that names are unique and non-empty, that every filter wraps
    /// a node declared before it, and that the event capacity is within
    /// `1..=MAX_EVENT_CAPACITY`.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_EVENT_CAPACITY).contains(&self.events.capacity) {
            return Err(ControlError::Config(format!(
                "events.capacity must be between 1 and {MAX_EVENT_CAPACITY}, got {}",
                self.events.capacity
            )));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            let name = node.node_name();
            if name.is_empty() {
                return Err(ControlError::Config("empty node-name".to_string()));
            }
            if let NodeConfig::WriteThreshold { file, .. } = node {
                if !seen.contains(file.as_str()) {
                    return Err(ControlError::Config(format!(
                        "filter '{name}' wraps '{file}', which is not declared before it"
                    )));
                }
            }
            if !seen.insert(name) {
                return Err(ControlError::DuplicateNode(name.to_string()));
            }
        }
        Ok(())
    }
}
