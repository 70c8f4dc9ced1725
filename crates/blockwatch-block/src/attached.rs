//! # Device-Attached Write Threshold
//!
//! The threshold lives on the [`BlockNode`] itself and watches writes through
//! a pre-write notifier registered on that node. The notifier exists exactly
//! while the threshold is non-zero:
//!
//! | Call | Before | After | Notifier |
//! |------|--------|-------|----------|
//! | `set(t > 0)` | disarmed | `t` | registered |
//! | `set(t2 > 0)` | `t` | `t2` | kept (no second registration) |
//! | `set(0)` | `t` | disarmed | removed |
//! | `set(0)` | disarmed | disarmed | none (request ignored) |
//! | crossing write | `t` | disarmed | removed, one event emitted |
//!
//! Evaluating the oracle and disarming happen under the node's threshold
//! lock, so overlapping writes produce at most one event per arm cycle.

use std::sync::{Arc, MutexGuard, PoisonError};

use blockwatch_threshold::{ThresholdState, Transition, WriteThresholdEvent};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::node::BlockNode;
use crate::notifier::{BeforeWriteNotifier, NotifierHandle, TrackedRequest};

/// Threshold state plus the notifier registration that backs it.
#[derive(Debug, Default)]
pub(crate) struct AttachedThreshold {
    state: ThresholdState,
    registration: Option<NotifierHandle>,
}

impl BlockNode {
    /// Sets the write threshold of this node, in bytes. `0` disables it.
    ///
    /// Notify when a write reaches past the threshold, meaning the device
    /// is becoming full and can be grown before it runs out.
    pub fn set_write_threshold(&self, threshold_bytes: u64) -> Transition {
        let mut attached = self.lock_attached();
        let transition = attached.state.set(threshold_bytes);

        if transition.registers_hook() {
            let handle = self.add_before_write_notifier(Arc::new(ThresholdNotifier));
            attached.registration = Some(handle);
        }
        if transition.releases_hook() {
            self.release_registration(&mut attached);
        }

        match transition {
            Transition::Armed => {
                debug!(node = %self.name(), threshold_bytes, "write threshold armed");
            }
            Transition::Updated => {
                debug!(node = %self.name(), threshold_bytes, "write threshold updated");
            }
            Transition::Disarmed => debug!(node = %self.name(), "write threshold disabled"),
            Transition::Ignored => {
                warn!(node = %self.name(), "ignoring disable request, no write threshold set");
            }
        }
        transition
    }

    /// Configured write threshold in bytes. Zero means none.
    #[must_use]
    pub fn write_threshold(&self) -> u64 {
        self.lock_attached().state.get()
    }

    /// True when a write threshold is set on this node.
    #[must_use]
    pub fn is_write_threshold_set(&self) -> bool {
        self.lock_attached().state.is_set()
    }

    fn release_registration(&self, attached: &mut AttachedThreshold) {
        if let Some(handle) = attached.registration.take() {
            self.remove_before_write_notifier(handle);
        }
    }

    // AttachedThreshold is only ever replaced field by field with Copy
    // values; recovering from poison cannot observe a torn state.
    fn lock_attached(&self) -> MutexGuard<'_, AttachedThreshold> {
        self.attached.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Pre-write observer installed while a node's threshold is armed.
///
/// Stateless: it reads and disarms the threshold of whichever node the
/// request is addressed to.
struct ThresholdNotifier;

impl BeforeWriteNotifier for ThresholdNotifier {
    fn notify(&self, req: &TrackedRequest<'_>) -> Result<()> {
        let node = req.node();

        let crossing = {
            let mut attached = node.lock_attached();
            let crossing = attached.state.check(req.offset(), req.bytes());
            if crossing.is_some() {
                // Auto-disable so a filling disk does not flood subscribers.
                node.release_registration(&mut attached);
            }
            crossing
        };

        if let Some(crossing) = crossing {
            info!(
                node = %node.name(),
                kind = %req.kind(),
                offset = req.offset(),
                bytes = req.bytes(),
                threshold = crossing.threshold,
                amount = crossing.amount,
                "write threshold exceeded"
            );
            if let Err(err) = node.events().emit(WriteThresholdEvent::new(node.name(), crossing)) {
                warn!(node = %node.name(), %err, "write threshold event lost");
                return Err(err.into());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemDevice;
    use crate::request::RequestFlags;
    use blockwatch_threshold::EventBus;

    const MIB: u64 = 1024 * 1024;

    fn node_with_bus(length: u64) -> (Arc<BlockNode>, Arc<EventBus>) {
        let bus = Arc::new(EventBus::default());
        let node = BlockNode::new("disk0", Arc::new(MemDevice::new(length)), bus.clone());
        (node, bus)
    }

    #[test]
    fn test_threshold_not_set_on_init() {
        let (node, _) = node_with_bus(MIB);
        assert!(!node.is_write_threshold_set());
        assert_eq!(node.write_threshold(), 0);
        assert_eq!(node.before_write_notifier_count(), 0);
    }

    #[test]
    fn test_threshold_set_get() {
        let (node, _) = node_with_bus(8 * MIB);
        assert_eq!(node.set_write_threshold(4 * MIB), Transition::Armed);
        assert!(node.is_write_threshold_set());
        assert_eq!(node.write_threshold(), 4 * MIB);
        assert_eq!(node.before_write_notifier_count(), 1);
    }

    #[test]
    fn test_threshold_multi_set_keeps_one_registration() {
        let (node, _) = node_with_bus(16 * MIB);
        node.set_write_threshold(4 * MIB);
        assert_eq!(node.set_write_threshold(15 * MIB), Transition::Updated);
        assert_eq!(node.write_threshold(), 15 * MIB);
        assert_eq!(node.before_write_notifier_count(), 1);
    }

    #[test]
    fn test_threshold_disable() {
        let (node, _) = node_with_bus(8 * MIB);
        node.set_write_threshold(4 * MIB);
        assert_eq!(node.set_write_threshold(0), Transition::Disarmed);
        assert!(!node.is_write_threshold_set());
        assert_eq!(node.before_write_notifier_count(), 0);
    }

    #[test]
    fn test_bogus_disable_is_noop() {
        let (node, _) = node_with_bus(MIB);
        assert_eq!(node.set_write_threshold(0), Transition::Ignored);
        assert!(!node.is_write_threshold_set());
        assert_eq!(node.before_write_notifier_count(), 0);
    }

    #[test]
    fn test_rearm_cycle_tracks_registration() {
        let (node, _) = node_with_bus(8 * MIB);
        for _ in 0..3 {
            assert_eq!(node.set_write_threshold(4 * MIB), Transition::Armed);
            assert_eq!(node.before_write_notifier_count(), 1);
            assert_eq!(node.set_write_threshold(0), Transition::Disarmed);
            assert_eq!(node.before_write_notifier_count(), 0);
        }
        assert_eq!(node.set_write_threshold(0), Transition::Ignored);
        assert_eq!(node.before_write_notifier_count(), 0);
    }

    #[test]
    fn test_write_below_threshold_no_event() {
        let (node, bus) = node_with_bus(8 * MIB);
        let mut rx = bus.subscribe();
        node.set_write_threshold(4 * MIB);

        node.pwrite(1024, &[0u8; 1024], RequestFlags::empty()).unwrap();

        assert!(rx.try_recv().is_err());
        assert!(node.is_write_threshold_set());
    }

    #[test]
    fn test_crossing_write_emits_once_and_disarms() {
        let (node, bus) = node_with_bus(8 * MIB);
        let mut rx = bus.subscribe();
        node.set_write_threshold(4 * MIB);

        node.pwrite(4 * MIB - 1024, &[1u8; 2048], RequestFlags::empty())
            .unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.node_name, "disk0");
        assert_eq!(event.amount_exceeded, 1024);
        assert_eq!(event.write_threshold, 4 * MIB);
        assert!(!node.is_write_threshold_set());
        assert_eq!(node.before_write_notifier_count(), 0);

        // The write itself still landed.
        let mut buf = [0u8; 2048];
        node.pread(4 * MIB - 1024, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 1));

        node.pwrite(4 * MIB, &[1u8; 4096], RequestFlags::empty()).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_zero_fill_and_discard_are_watched() {
        let (node, bus) = node_with_bus(8 * MIB);
        let mut rx = bus.subscribe();

        node.set_write_threshold(MIB);
        node.pwrite_zeroes(MIB, 4096, RequestFlags::empty()).unwrap();
        assert_eq!(rx.try_recv().unwrap().amount_exceeded, 4096);

        node.set_write_threshold(2 * MIB);
        node.pdiscard(3 * MIB, 4096).unwrap();
        assert_eq!(rx.try_recv().unwrap().amount_exceeded, MIB + 4096);
    }
}
