//! # Write Threshold
//!
//! Threshold arithmetic, arm/disarm state and crossing events for
//! thin-provisioned block devices. A threshold is a byte offset; the first
//! write-like request that reaches past it raises a one-time
//! `BLOCK_WRITE_THRESHOLD` event so a controller can grow the backing store
//! before the guest runs out of space.
//!
//! ## Components
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`exceeded`] | Pure oracle: how far a request reaches past the threshold |
//! | [`ThresholdState`] | `Disarmed` / `Armed(t)` state machine |
//! | [`WriteThreshold`] | Thread-safe cell: check-and-disarm as one exclusive region |
//! | [`WriteThresholdEvent`] | Crossing record delivered to subscribers |
//! | [`EventBus`] | Broadcast fan-out of crossing events |
//!
//! ## Quick Start
//!
//! ```rust
//! use blockwatch_threshold::{exceeded, WriteThreshold};
//!
//! const MIB: u64 = 1024 * 1024;
//!
//! assert_eq!(exceeded(4 * MIB, 1024, 1024), 0);
//! assert_eq!(exceeded(4 * MIB, 4 * MIB - 1024, 2048), 1024);
//!
//! let threshold = WriteThreshold::new();
//! threshold.set(4 * MIB);
//!
//! let crossing = threshold.check_amount(4 * MIB - 1024, 2048).unwrap();
//! assert_eq!(crossing.amount, 1024);
//! assert_eq!(crossing.threshold, 4 * MIB);
//!
//! // Auto-disarmed: the next write past the offset is silent.
//! assert!(!threshold.is_set());
//! assert!(threshold.check_amount(4 * MIB, 4096).is_none());
//! ```
//!
//! ## Guarantees
//!
//! - At most one crossing per arm cycle, even under concurrent writers
//! - The oracle never allocates and has no side effects
//! - Nothing here vetoes or rewrites a request; monitoring is observation only

mod error;
mod event;
mod oracle;
mod state;

pub use error::{Result, ThresholdError};
pub use event::{
    EventBus, EventMessage, EventSink, WriteThresholdEvent, MAX_EVENT_CAPACITY,
    WRITE_THRESHOLD_EVENT,
};
pub use oracle::exceeded;
pub use state::{Crossing, ThresholdState, Transition, WriteThreshold};
