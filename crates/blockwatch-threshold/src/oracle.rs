//! # Threshold Oracle
//!
//! Decides whether a write-like request reaches past the configured
//! threshold and by how much.
//!
//! ## Cost Model
//!
//! | Request position | Reported excess |
//! |------------------|-----------------|
//! | Threshold disabled (`0`) | `0` |
//! | Entirely below (`offset + bytes <= threshold`) | `0` |
//! | Straddling (`offset <= threshold < offset + bytes`) | `(offset + bytes) - threshold` |
//! | Entirely beyond (`offset > threshold`) | `(offset - threshold) + bytes` |
//!
//! The last two rows are deliberately asymmetric: once a request starts past
//! the threshold, every byte of it counts, plus the gap it already skipped.

/// Returns the extent of a write request that exceeded `threshold`, or zero
/// if the request stays below it or the threshold is disabled.
///
/// # Preconditions
///
/// `offset + bytes` must not overflow `u64`. This is not checked here; the
/// block layer validates every request against the device length before any
/// threshold check runs.
///
/// # Example
///
/// ```rust
/// use blockwatch_threshold::exceeded;
///
/// assert_eq!(exceeded(0, 1 << 40, 4096), 0);
/// assert_eq!(exceeded(4096, 0, 4096), 0);
/// assert_eq!(exceeded(4096, 2048, 4096), 2048);
/// assert_eq!(exceeded(4096, 8192, 512), 4608);
/// ```
#[inline]
#[must_use]
pub const fn exceeded(threshold: u64, offset: u64, bytes: u64) -> u64 {
    if threshold == 0 {
        return 0;
    }
    if offset > threshold {
        return (offset - threshold) + bytes;
    }
    if offset + bytes > threshold {
        return (offset + bytes) - threshold;
    }
    0
}
