//! # Integration Tests
//!
//! Both monitor shapes driven through full node stacks: device-attached
//! notifiers, the filter stage, event delivery failures and concurrent
//! writers racing for the same crossing.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use blockwatch_block::{
    BlockError, BlockNode, MemDevice, RequestFlags, WriteThresholdFilter, WriteThresholdOptions,
};
use blockwatch_threshold::{EventBus, EventSink, Result, ThresholdError, WriteThresholdEvent};

const MIB: u64 = 1024 * 1024;

/// Records every event it is given.
#[derive(Debug, Default)]
struct Recorder {
    events: Mutex<Vec<WriteThresholdEvent>>,
}

impl Recorder {
    fn taken(&self) -> Vec<WriteThresholdEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl EventSink for Recorder {
    fn emit(&self, event: WriteThresholdEvent) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Refuses every event.
#[derive(Debug, Default)]
struct Unreachable {
    attempts: AtomicUsize,
}

impl EventSink for Unreachable {
    fn emit(&self, _event: WriteThresholdEvent) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(ThresholdError::EventDelivery("monitor socket closed".into()))
    }
}

fn filter_stack(
    threshold: u64,
    sink: Arc<dyn EventSink>,
) -> (Arc<BlockNode>, Arc<WriteThresholdFilter>, Arc<BlockNode>) {
    let child = BlockNode::new("disk0", Arc::new(MemDevice::new(8 * MIB)), sink.clone());
    let filter = Arc::new(WriteThresholdFilter::with_options(
        child.clone(),
        WriteThresholdOptions {
            write_threshold: threshold,
        },
        sink.clone(),
    ));
    let top = BlockNode::new("wt0", filter.clone(), sink);
    (child, filter, top)
}

// ============================================================================
// Filter Stage
// ============================================================================

#[test]
fn test_filter_with_zero_never_emits() {
    let recorder = Arc::new(Recorder::default());
    let (_, filter, top) = filter_stack(0, recorder.clone());

    top.pwrite(0, &vec![0x5a; 4 * MIB as usize], RequestFlags::empty())
        .unwrap();
    top.pwrite_zeroes(4 * MIB, 4 * MIB, RequestFlags::MAY_UNMAP)
        .unwrap();
    top.pdiscard(0, 8 * MIB).unwrap();

    assert!(recorder.taken().is_empty());
    assert!(!filter.is_threshold_set());
}

#[test]
fn test_filter_reads_match_child() {
    let recorder = Arc::new(Recorder::default());
    let (child, _, top) = filter_stack(MIB, recorder);

    let pattern: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    child.pwrite(MIB - 4096, &pattern, RequestFlags::empty()).unwrap();

    for (offset, len) in [(0, 4096), (MIB - 4096, 64 * 1024), (MIB + 100, 3000), (7 * MIB, 512)] {
        let mut via_filter = vec![0u8; len];
        let mut direct = vec![0u8; len];
        top.pread(offset, &mut via_filter).unwrap();
        child.pread(offset, &mut direct).unwrap();
        assert_eq!(via_filter, direct, "mismatch at offset {offset}");
    }
}

#[test]
fn test_filter_four_mib_scenarios() {
    let recorder = Arc::new(Recorder::default());
    let (_, filter, top) = filter_stack(4 * MIB, recorder.clone());

    top.pwrite(1024, &[1u8; 1024], RequestFlags::empty()).unwrap();
    assert!(recorder.taken().is_empty());
    assert!(filter.is_threshold_set());

    top.pwrite(4 * MIB - 1024, &[1u8; 2048], RequestFlags::empty())
        .unwrap();
    let events = recorder.taken();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].node_name, "disk0");
    assert_eq!(events[0].amount_exceeded, 1024);
    assert_eq!(events[0].write_threshold, 4 * MIB);
    assert!(!filter.is_threshold_set());
}

#[test]
fn test_filter_chain_first_non_filter() {
    let recorder = Arc::new(Recorder::default());
    let (child, _, top) = filter_stack(0, recorder.clone());

    let outer = Arc::new(WriteThresholdFilter::with_options(
        top.clone(),
        WriteThresholdOptions::default(),
        recorder.clone(),
    ));
    let outer_node = BlockNode::new("wt1", outer, recorder);

    assert!(outer_node.recurse_is_first_non_filter(&child));
    assert!(!outer_node.recurse_is_first_non_filter(&top));
    assert_eq!(outer_node.length().unwrap(), 8 * MIB);
}

#[test]
fn test_stacked_monitors_both_fire() {
    // Filter on top, legacy threshold on the child: each owns its own state.
    let recorder = Arc::new(Recorder::default());
    let (child, _, top) = filter_stack(2 * MIB, recorder.clone());
    child.set_write_threshold(3 * MIB);

    top.pwrite(3 * MIB, &[0u8; 4096], RequestFlags::empty()).unwrap();

    let amounts: Vec<u64> = recorder.taken().iter().map(|e| e.amount_exceeded).collect();
    assert_eq!(amounts, vec![MIB + 4096, 4096]);
}

#[test]
fn test_crossing_write_is_never_rejected() {
    let sink = Arc::new(Recorder::default());
    let node = BlockNode::new("disk0", Arc::new(MemDevice::new(4 * MIB)), sink.clone());
    node.set_write_threshold(MIB);

    node.pwrite(MIB - 512, &[0x5au8; 4096], RequestFlags::empty())
        .unwrap();
    assert_eq!(sink.taken().len(), 1);

    let mut buf = [0u8; 4096];
    node.pread(MIB - 512, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0x5a));
}

// ============================================================================
// Event Delivery Failure
// ============================================================================

#[test]
fn test_filter_delivery_failure_fails_request() {
    let sink = Arc::new(Unreachable::default());
    let (child, filter, top) = filter_stack(MIB, sink.clone());

    let err = top
        .pwrite(MIB, &[0xffu8; 4096], RequestFlags::empty())
        .unwrap_err();
    assert!(matches!(err, BlockError::Event(ThresholdError::EventDelivery(_))));
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);

    // Not forwarded, and no retry on the next write.
    let mut buf = [0u8; 4096];
    child.pread(MIB, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0));
    assert!(!filter.is_threshold_set());

    top.pwrite(MIB, &[0xffu8; 4096], RequestFlags::empty()).unwrap();
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
}

#[test]
fn test_attached_delivery_failure_fails_request() {
    let sink = Arc::new(Unreachable::default());
    let node = BlockNode::new("disk0", Arc::new(MemDevice::new(4 * MIB)), sink.clone());
    node.set_write_threshold(MIB);

    assert!(node.pdiscard(0, 2 * MIB).is_err());
    assert!(!node.is_write_threshold_set());
    assert_eq!(node.before_write_notifier_count(), 0);

    node.pdiscard(0, 2 * MIB).unwrap();
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Concurrency
// ============================================================================

const WRITERS: usize = 16;

fn race<F>(write: F)
where
    F: Fn(u64) + Send + Sync + 'static,
{
    let write = Arc::new(write);
    let barrier = Arc::new(Barrier::new(WRITERS));
    let handles: Vec<_> = (0..WRITERS as u64)
        .map(|i| {
            let write = write.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                // Every writer straddles or passes the 4 MiB threshold.
                write(4 * MIB - 2048 + i * 4096);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_concurrent_crossing_on_node_emits_once() {
    for _ in 0..20 {
        let bus = Arc::new(EventBus::new(1024));
        let mut rx = bus.subscribe();
        let node = BlockNode::new("disk0", Arc::new(MemDevice::new(8 * MIB)), bus);
        node.set_write_threshold(4 * MIB);

        let writer = node.clone();
        race(move |offset| {
            writer
                .pwrite(offset, &[1u8; 4096], RequestFlags::empty())
                .unwrap();
        });

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert!(!node.is_write_threshold_set());
    }
}

#[test]
fn test_concurrent_crossing_on_filter_emits_once() {
    for _ in 0..20 {
        let recorder = Arc::new(Recorder::default());
        let (_, filter, top) = filter_stack(4 * MIB, recorder.clone());

        race(move |offset| {
            top.pwrite_zeroes(offset, 4096, RequestFlags::empty()).unwrap();
        });

        assert_eq!(recorder.taken().len(), 1);
        assert!(!filter.is_threshold_set());
    }
}

#[test]
fn test_rearm_during_writes_is_consistent() {
    let recorder = Arc::new(Recorder::default());
    let node = BlockNode::new("disk0", Arc::new(MemDevice::new(8 * MIB)), recorder.clone());

    let writer = node.clone();
    let handle = thread::spawn(move || {
        for i in 0..256u64 {
            writer
                .pwrite((i % 2048) * 4096, &[2u8; 4096], RequestFlags::empty())
                .unwrap();
        }
    });
    for i in 0..64u64 {
        node.set_write_threshold(if i % 3 == 0 { 0 } else { (i + 1) * 4096 });
    }
    handle.join().unwrap();

    // Registered iff armed, whatever interleaving happened.
    assert_eq!(
        node.before_write_notifier_count(),
        usize::from(node.is_write_threshold_set())
    );
    for event in recorder.taken() {
        assert!(event.amount_exceeded > 0);
        assert!(event.write_threshold > 0);
    }
}
