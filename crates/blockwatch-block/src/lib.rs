//! # Blockwatch Block Layer
//!
//! A small block I/O framework with the two places a write threshold can
//! hook in: a pre-write notifier on a node, and a pass-through filter stage.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌────────────────────────────────────────┐
//!   pwrite ────────▶ │ BlockNode "wt0"                        │
//!                    │  1. range check                        │
//!                    │  2. before-write notifiers             │
//!                    │  3. driver call                        │
//!                    └──────────────────┬─────────────────────┘
//!                                       ▼
//!                    ┌────────────────────────────────────────┐
//!                    │ WriteThresholdFilter                   │
//!                    │  check_amount ─▶ EventSink             │
//!                    └──────────────────┬─────────────────────┘
//!                                       ▼
//!                    ┌────────────────────────────────────────┐
//!                    │ BlockNode "disk0"                      │
//!                    │  notifiers: [ThresholdNotifier]  ◀──── set_write_threshold
//!                    └──────────────────┬─────────────────────┘
//!                                       ▼
//!                                   MemDevice
//! ```
//!
//! ## Components
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`BlockDriver`] | Storage contract implemented by devices and filters |
//! | [`BlockNode`] | Named handle; validates requests and runs notifiers |
//! | [`BeforeWriteNotifier`] | Observer called before every write-like request |
//! | [`MemDevice`] | Sparse in-memory disk |
//! | [`WriteThresholdFilter`] | `write-threshold` filter stage |
//! | [`WriteThresholdOptions`] | Parsed filter options |
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use blockwatch_block::{BlockNode, MemDevice, RequestFlags};
//! use blockwatch_threshold::EventBus;
//!
//! let bus = Arc::new(EventBus::default());
//! let mut events = bus.subscribe();
//! let disk = BlockNode::new("disk0", Arc::new(MemDevice::new(8 << 20)), bus.clone());
//!
//! disk.set_write_threshold(4 << 20);
//! disk.pwrite((4 << 20) - 1024, &[0xab; 2048], RequestFlags::empty())?;
//!
//! let event = events.try_recv().unwrap();
//! assert_eq!(event.node_name, "disk0");
//! assert_eq!(event.amount_exceeded, 1024);
//! assert!(!disk.is_write_threshold_set());
//! # Ok::<(), blockwatch_block::BlockError>(())
//! ```

mod attached;
mod driver;
mod error;
mod filter;
mod mem;
mod node;
mod notifier;
mod options;
mod request;

pub use driver::BlockDriver;
pub use error::{BlockError, Result};
pub use filter::{WriteThresholdFilter, FORMAT_NAME};
pub use mem::{MemDevice, CLUSTER_SIZE, MEMORY_FORMAT};
pub use node::BlockNode;
pub use notifier::{BeforeWriteNotifier, NotifierHandle, TrackedRequest};
pub use options::{WriteThresholdOptions, OPT_WRITE_THRESHOLD};
pub use request::{check_range, BlockStatus, RequestFlags, RequestKind};
