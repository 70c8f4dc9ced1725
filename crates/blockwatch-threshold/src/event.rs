//! # Crossing Events
//!
//! The record delivered to subscribers when a write crosses the threshold,
//! and the in-process transport that fans it out.
//!
//! ## Wire Shape
//!
//! ```json
//! {
//!   "event": "BLOCK_WRITE_THRESHOLD",
//!   "data": {
//!     "node-name": "disk0",
//!     "amount-exceeded": 1024,
//!     "write-threshold": 4194304
//!   }
//! }
//! ```
//!
//! Delivery is fire-and-forget: no acknowledgment, no retry. A transport
//! that cannot take the event returns
//! [`ThresholdError::EventDelivery`](crate::ThresholdError::EventDelivery) and
//! the write that produced it fails.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::Result;
use crate::state::Crossing;

/// Event name carried in the `event` field of an [`EventMessage`].
pub const WRITE_THRESHOLD_EVENT: &str = "BLOCK_WRITE_THRESHOLD";

/// Default broadcast buffer for [`EventBus::default`].
const DEFAULT_CAPACITY: usize = 256;

/// Largest per-subscriber buffer an [`EventBus`] will allocate.
pub const MAX_EVENT_CAPACITY: usize = 1 << 16;

/// A write crossed the configured threshold of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WriteThresholdEvent {
    /// Name of the monitored node.
    pub node_name: String,
    /// Bytes the triggering request reached past the threshold.
    pub amount_exceeded: u64,
    /// Threshold in effect when the event fired.
    pub write_threshold: u64,
}

impl WriteThresholdEvent {
    /// Builds the event for a crossing detected on `node_name`.
    pub fn new(node_name: impl Into<String>, crossing: Crossing) -> Self {
        Self {
            node_name: node_name.into(),
            amount_exceeded: crossing.amount,
            write_threshold: crossing.threshold,
        }
    }

    /// Wraps the event in its named envelope for serialization.
    #[must_use]
    pub fn to_message(&self) -> EventMessage {
        EventMessage {
            event: WRITE_THRESHOLD_EVENT.to_string(),
            data: self.clone(),
        }
    }
}

impl fmt::Display for WriteThresholdEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: write threshold {} exceeded by {} bytes",
            self.node_name, self.write_threshold, self.amount_exceeded
        )
    }
}

/// Named envelope for a [`WriteThresholdEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMessage {
    /// Always [`WRITE_THRESHOLD_EVENT`].
    pub event: String,
    /// Event payload.
    pub data: WriteThresholdEvent,
}

/// Destination for crossing events.
///
/// Implementations must not block: `emit` runs on the write path.
pub trait EventSink: Send + Sync + fmt::Debug {
    /// Hands one event to the transport.
    ///
    /// # Errors
    ///
    /// [`ThresholdError::EventDelivery`](crate::ThresholdError::EventDelivery)
    /// when the transport cannot accept the event. The caller does not retry.
    fn emit(&self, event: WriteThresholdEvent) -> Result<()>;
}

/// In-process fan-out of crossing events.
///
/// Wraps a [`broadcast::Sender`]; every subscriber receives every event
/// published after it subscribed. Publishing with no subscribers is not an
/// error: nobody asked to be told.
///
/// # Example
///
/// ```rust
/// use blockwatch_threshold::{Crossing, EventBus, EventSink, WriteThresholdEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// let crossing = Crossing { amount: 512, threshold: 4096 };
/// bus.emit(WriteThresholdEvent::new("disk0", crossing))?;
///
/// let event = rx.try_recv().unwrap();
/// assert_eq!(event.node_name, "disk0");
/// assert_eq!(event.amount_exceeded, 512);
/// # Ok::<(), blockwatch_threshold::ThresholdError>(())
/// ```
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<WriteThresholdEvent>,
    emitted: AtomicU64,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` undelivered events per
    /// subscriber. Slow subscribers observe `Lagged` once it fills.
    ///
    /// `capacity` is clamped to `1..=MAX_EVENT_CAPACITY`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.clamp(1, MAX_EVENT_CAPACITY));
        Self {
            sender,
            emitted: AtomicU64::new(0),
        }
    }

    /// Subscribes to all events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WriteThresholdEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Total events emitted through this bus, delivered or not.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: WriteThresholdEvent) -> Result<()> {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        match self.sender.send(event) {
            Ok(receivers) => {
                debug!(receivers, "write threshold event delivered");
            }
            Err(broadcast::error::SendError(event)) => {
                debug!(node = %event.node_name, "write threshold event has no subscribers");
            }
        }
        Ok(())
    }
}
