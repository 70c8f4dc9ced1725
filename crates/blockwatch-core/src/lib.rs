//! # Blockwatch Core
//!
//! Control plane for write threshold monitoring of thin-provisioned block
//! devices. A management client sets a threshold on a node; the first write
//! that reaches past it publishes one `BLOCK_WRITE_THRESHOLD` event so the
//! client can grow the backing store before the guest runs out of space.
//!
//! ## Monitor Shapes
//!
//! | Shape | Where the threshold lives | How writes are seen | Control |
//! |-------|---------------------------|---------------------|---------|
//! | Device-attached | On the node | Pre-write notifier, registered while armed | `block_set_write_threshold` |
//! | Filter stage | On a `write-threshold` filter node | Every request passes through the filter | filter options, `set_filter_threshold` |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       BLOCKWATCH CORE                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │   BlockwatchConfig ──▶ ┌─────────────────┐ ──▶ subscribe()      │
//! │                        │   BlockGraph    │      (EventBus)      │
//! │   control commands ──▶ └────────┬────────┘                      │
//! │                                 │                               │
//! │              ┌──────────────────┼──────────────────┐            │
//! │              ▼                  ▼                  ▼            │
//! │       ┌────────────┐    ┌──────────────┐    ┌────────────┐      │
//! │       │ BlockNode  │    │ BlockNode    │    │ BlockNode  │      │
//! │       │ (memory)   │◀───│ (filter)     │    │ (memory)   │      │
//! │       └────────────┘    └──────────────┘    └────────────┘      │
//! │                                                                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use blockwatch_core::{BlockGraph, BlockwatchConfig, RequestFlags};
//! use serde_json::json;
//!
//! let config: BlockwatchConfig = serde_json::from_value(json!({
//!     "nodes": [
//!         { "driver": "memory", "node-name": "disk0", "size": 16777216 },
//!         { "driver": "write-threshold", "node-name": "wt0", "file": "disk0",
//!           "options": { "write-threshold": 8388608 } }
//!     ]
//! }))?;
//! let graph = BlockGraph::from_config(&config)?;
//! let mut events = graph.subscribe();
//!
//! let top = graph.find_node("wt0")?;
//! top.pwrite(8 << 20, &[0u8; 4096], RequestFlags::empty())?;
//!
//! let event = events.try_recv().unwrap();
//! assert_eq!(event.node_name, "disk0");
//! assert_eq!(event.amount_exceeded, 4096);
//! # Ok::<(), blockwatch_core::ControlError>(())
//! ```
//!
//! ## Notes
//!
//! - Thresholds only observe; a request is never rejected for crossing one
//! - A request fails only if its crossing event cannot be delivered
//! - One event per arm cycle; re-arm with a new threshold after growing

mod config;
mod error;
mod graph;

pub use config::{BlockwatchConfig, EventConfig, NodeConfig};
pub use error::ControlError;
pub use graph::BlockGraph;

// Re-export component types for convenience
pub use blockwatch_block::{BlockError, BlockNode, RequestFlags, WriteThresholdFilter};
pub use blockwatch_threshold::{
    exceeded, EventBus, EventMessage, Transition, WriteThresholdEvent, WRITE_THRESHOLD_EVENT,
};

/// Core result type for control operations.
pub type Result<T> = std::result::Result<T, ControlError>;
