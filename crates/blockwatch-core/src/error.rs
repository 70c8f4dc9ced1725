//! Error types for blockwatch control operations.

use thiserror::Error;

/// Core error type for control operations.
#[derive(Debug, Error)]
pub enum ControlError {
    /// No node with this name exists. Nothing was changed.
    #[error("Device '{0}' not found")]
    DeviceNotFound(String),

    /// A node with this name already exists.
    #[error("Duplicate node name '{0}'")]
    DuplicateNode(String),

    /// The node exists but is not a `write-threshold` filter.
    #[error("Node '{0}' is not a write-threshold filter")]
    NotAFilter(String),

    /// The node exists but is not backed by a memory device.
    #[error("Node '{0}' is not a memory device")]
    NotAMemoryDevice(String),

    /// Another node still uses this one as its child.
    #[error("Node '{node}' is in use by '{user}'")]
    NodeInUse {
        /// Node that was to be removed.
        node: String,
        /// Filter node wrapping it.
        user: String,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Block layer error passthrough.
    #[error("Block error: {0}")]
    Block(#[from] blockwatch_block::BlockError),

    /// Config file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for [`BlockwatchConfig`](crate::BlockwatchConfig).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
