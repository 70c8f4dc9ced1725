//! Error types for threshold monitoring.

use thiserror::Error;

/// Result type alias for threshold operations.
pub type Result<T> = std::result::Result<T, ThresholdError>;

/// Errors raised while reporting a threshold crossing.
///
/// The threshold machinery itself does no I/O, so the only failure is
/// handing a crossing event to its transport.
#[derive(Debug, Error)]
pub enum ThresholdError {
    /// The event transport rejected a crossing event.
    ///
    /// Fatal to the write request that produced the crossing. The monitor
    /// has already disarmed and does not retry.
    #[error("event delivery failed: {0}")]
    EventDelivery(String),
}
