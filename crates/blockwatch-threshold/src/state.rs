//! # Arm / Disarm State Machine
//!
//! One write threshold per monitored device, shared by both integration
//! shapes (device-attached notifier and filter stage).
//!
//! ```text
//!               set(t > 0)                 set(t2 > 0)
//!   ┌──────────┐ ─────────▶ ┌──────────┐ ───────────┐
//!   │ Disarmed │            │ Armed(t) │            │
//!   └──────────┘ ◀───────── └──────────┘ ◀──────────┘
//!     ▲      │   set(0) or crossing
//!     └──────┘
//!      set(0)
//! ```
//!
//! [`ThresholdState`] is the pure value; [`WriteThreshold`] wraps it in a
//! mutex so "evaluate the oracle, then disarm" happens as one exclusive
//! region. Two overlapping writes that both straddle the threshold cannot
//! both observe it armed, so at most one [`Crossing`] is produced per arm
//! cycle.

use std::num::NonZeroU64;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::oracle::exceeded;

/// Arm state of a single write threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ThresholdState {
    /// No threshold configured. Writes are not evaluated.
    #[default]
    Disarmed,
    /// Threshold configured at the given byte offset.
    Armed(NonZeroU64),
}

/// Outcome of a [`ThresholdState::set`] call.
///
/// Callers that attach a hook to a device use this to decide whether to
/// register or release it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    /// `Disarmed -> Armed`. A hook must be registered.
    Armed,
    /// `Armed -> Armed` with a new offset. The existing hook stays.
    Updated,
    /// `Armed -> Disarmed`. The hook must be released.
    Disarmed,
    /// `Disarmed -> Disarmed`. A disable request with nothing to disable.
    Ignored,
}

impl Transition {
    /// True when this transition creates a hook registration.
    #[inline]
    #[must_use]
    pub const fn registers_hook(self) -> bool {
        matches!(self, Self::Armed)
    }

    /// True when this transition destroys a hook registration.
    #[inline]
    #[must_use]
    pub const fn releases_hook(self) -> bool {
        matches!(self, Self::Disarmed)
    }
}

/// A detected threshold crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crossing {
    /// Bytes past the threshold, as computed by [`exceeded`].
    pub amount: u64,
    /// Threshold in effect when the crossing was detected.
    pub threshold: u64,
}

impl ThresholdState {
    /// Builds the state for a raw threshold value (`0` means disarmed).
    #[inline]
    #[must_use]
    pub const fn from_bytes(threshold_bytes: u64) -> Self {
        match NonZeroU64::new(threshold_bytes) {
            Some(threshold) => Self::Armed(threshold),
            None => Self::Disarmed,
        }
    }

    /// Current threshold in bytes, `0` when disarmed.
    #[inline]
    #[must_use]
    pub const fn get(&self) -> u64 {
        match self {
            Self::Disarmed => 0,
            Self::Armed(threshold) => threshold.get(),
        }
    }

    /// True when a threshold is configured.
    #[inline]
    #[must_use]
    pub const fn is_set(&self) -> bool {
        matches!(self, Self::Armed(_))
    }

    /// Applies a set request.
    ///
    /// A non-zero value arms or updates in place. Zero disarms an armed
    /// state and is ignored on a disarmed one.
    pub fn set(&mut self, threshold_bytes: u64) -> Transition {
        let next = Self::from_bytes(threshold_bytes);
        let transition = match (*self, next) {
            (Self::Disarmed, Self::Armed(_)) => Transition::Armed,
            (Self::Armed(_), Self::Armed(_)) => Transition::Updated,
            (Self::Armed(_), Self::Disarmed) => Transition::Disarmed,
            (Self::Disarmed, Self::Disarmed) => Transition::Ignored,
        };
        *self = next;
        transition
    }

    /// Evaluates a write-like request and disarms on a crossing.
    ///
    /// Returns `None` when disarmed or when the request stays below the
    /// threshold; the state is left untouched in both cases.
    pub fn check(&mut self, offset: u64, bytes: u64) -> Option<Crossing> {
        let threshold = self.get();
        let amount = exceeded(threshold, offset, bytes);
        if amount == 0 {
            return None;
        }
        *self = Self::Disarmed;
        Some(Crossing { amount, threshold })
    }
}

/// Thread-safe write threshold.
///
/// Owned by whatever it monitors (a filter stage, a device handle) and
/// dropped with it. All reads and transitions take the internal lock, so a
/// concurrent [`check_amount`](Self::check_amount) and
/// [`set`](Self::set) are linearized.
///
/// # Example
///
/// ```rust
/// use blockwatch_threshold::{Transition, WriteThreshold};
///
/// let threshold = WriteThreshold::new();
/// assert_eq!(threshold.set(0), Transition::Ignored);
/// assert_eq!(threshold.set(1 << 20), Transition::Armed);
/// assert_eq!(threshold.set(2 << 20), Transition::Updated);
/// assert_eq!(threshold.get(), 2 << 20);
/// assert_eq!(threshold.set(0), Transition::Disarmed);
/// assert!(!threshold.is_set());
/// ```
#[derive(Debug, Default)]
pub struct WriteThreshold {
    state: Mutex<ThresholdState>,
}

impl WriteThreshold {
    /// Creates a disarmed threshold.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a threshold armed at `threshold_bytes` (`0` leaves it disarmed).
    #[must_use]
    pub fn with_threshold(threshold_bytes: u64) -> Self {
        Self {
            state: Mutex::new(ThresholdState::from_bytes(threshold_bytes)),
        }
    }

    /// Current threshold in bytes, `0` when disarmed.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.lock().get()
    }

    /// True when a threshold is configured.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.lock().is_set()
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> ThresholdState {
        *self.lock()
    }

    /// Applies a set request. See [`ThresholdState::set`].
    pub fn set(&self, threshold_bytes: u64) -> Transition {
        let transition = self.lock().set(threshold_bytes);
        debug!(threshold_bytes, ?transition, "write threshold set");
        transition
    }

    /// Evaluates a write-like request and disarms on a crossing, as one
    /// exclusive region.
    pub fn check_amount(&self, offset: u64, bytes: u64) -> Option<Crossing> {
        self.lock().check(offset, bytes)
    }

    // The guarded value is a plain Copy enum, so a panic elsewhere while the
    // lock was held cannot leave it half-written.
    fn lock(&self) -> MutexGuard<'_, ThresholdState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
