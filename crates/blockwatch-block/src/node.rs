//! # Block Nodes
//!
//! A [`BlockNode`] is a named handle on a driver. Callers issue I/O through
//! the node, never through the driver directly, so every request gets the
//! same treatment:
//!
//! 1. Range validation against the current device length
//! 2. For write-like requests, every registered [`BeforeWriteNotifier`]
//! 3. The driver call
//!
//! Nodes also own the device-attached write threshold (see
//! [`BlockNode::set_write_threshold`]).

use std::fmt;
use std::sync::{Arc, Mutex};

use blockwatch_threshold::EventSink;
use tracing::trace;

use crate::attached::AttachedThreshold;
use crate::driver::BlockDriver;
use crate::error::Result;
use crate::notifier::{BeforeWriteNotifier, NotifierHandle, NotifierList, TrackedRequest};
use crate::request::{check_range, BlockStatus, RequestFlags, RequestKind};

/// Named handle on a block driver.
///
/// Shared as `Arc<BlockNode>`; every method takes `&self` and may be called
/// from many threads at once.
pub struct BlockNode {
    name: String,
    driver: Arc<dyn BlockDriver>,
    events: Arc<dyn EventSink>,
    notifiers: NotifierList,
    pub(crate) attached: Mutex<AttachedThreshold>,
}

impl BlockNode {
    /// Creates a node. Crossing events raised on this node go to `events`.
    pub fn new(
        name: impl Into<String>,
        driver: Arc<dyn BlockDriver>,
        events: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            driver,
            events,
            notifiers: NotifierList::default(),
            attached: Mutex::new(AttachedThreshold::default()),
        })
    }

    /// Node name, unique within a graph.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The driver behind this node.
    #[must_use]
    pub fn driver(&self) -> &Arc<dyn BlockDriver> {
        &self.driver
    }

    /// Where crossing events for this node are delivered.
    #[must_use]
    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// Driver format name.
    #[must_use]
    pub fn format_name(&self) -> &'static str {
        self.driver.format_name()
    }

    /// True when the driver is a pass-through filter.
    #[must_use]
    pub fn is_filter(&self) -> bool {
        self.driver.is_filter()
    }

    /// Reads `buf.len()` bytes at `offset`.
    pub fn pread(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.check_request(offset, buf.len() as u64)?;
        self.driver.read(offset, buf)
    }

    /// Writes `data` at `offset`.
    pub fn pwrite(&self, offset: u64, data: &[u8], flags: RequestFlags) -> Result<()> {
        let bytes = data.len() as u64;
        self.check_request(offset, bytes)?;
        self.notify_before_write(RequestKind::Write, offset, bytes)?;
        self.driver.write(offset, data, flags)
    }

    /// Writes `bytes` zeroes at `offset`.
    pub fn pwrite_zeroes(&self, offset: u64, bytes: u64, flags: RequestFlags) -> Result<()> {
        self.check_request(offset, bytes)?;
        self.notify_before_write(RequestKind::WriteZeroes, offset, bytes)?;
        self.driver.write_zeroes(offset, bytes, flags)
    }

    /// Discards `bytes` at `offset`.
    pub fn pdiscard(&self, offset: u64, bytes: u64) -> Result<()> {
        self.check_request(offset, bytes)?;
        self.notify_before_write(RequestKind::Discard, offset, bytes)?;
        self.driver.discard(offset, bytes)
    }

    /// Flushes the driver.
    pub fn flush(&self) -> Result<()> {
        self.driver.flush()
    }

    /// Device length in bytes.
    pub fn length(&self) -> Result<u64> {
        self.driver.length()
    }

    /// Allocation status of the run starting at `offset`.
    pub fn block_status(&self, offset: u64, bytes: u64) -> Result<BlockStatus> {
        self.check_request(offset, bytes)?;
        self.driver.block_status(offset, bytes)
    }

    /// Write flags the driver honors.
    #[must_use]
    pub fn supported_write_flags(&self) -> RequestFlags {
        self.driver.supported_write_flags()
    }

    /// Zero-write flags the driver honors.
    #[must_use]
    pub fn supported_zero_flags(&self) -> RequestFlags {
        self.driver.supported_zero_flags()
    }

    /// True when `candidate` is the first non-filter node reached by walking
    /// down from this node through filters.
    #[must_use]
    pub fn recurse_is_first_non_filter(&self, candidate: &BlockNode) -> bool {
        if !self.driver.is_filter() {
            return std::ptr::eq(self, candidate);
        }
        self.driver.recurse_is_first_non_filter(candidate)
    }

    /// Registers an observer run before every write-like request.
    pub fn add_before_write_notifier(
        &self,
        notifier: Arc<dyn BeforeWriteNotifier>,
    ) -> NotifierHandle {
        self.notifiers.add(notifier)
    }

    /// Removes a registration. Returns false if it was already gone.
    pub fn remove_before_write_notifier(&self, handle: NotifierHandle) -> bool {
        self.notifiers.remove(handle)
    }

    /// Number of registered pre-write notifiers.
    #[must_use]
    pub fn before_write_notifier_count(&self) -> usize {
        self.notifiers.len()
    }

    fn check_request(&self, offset: u64, bytes: u64) -> Result<()> {
        check_range(offset, bytes, self.driver.length()?)
    }

    fn notify_before_write(&self, kind: RequestKind, offset: u64, bytes: u64) -> Result<()> {
        let req = TrackedRequest::new(self, kind, offset, bytes);
        for notifier in self.notifiers.snapshot() {
            notifier.notify(&req)?;
        }
        trace!(node = %self.name, %kind, offset, bytes, "write-like request admitted");
        Ok(())
    }
}

impl fmt::Debug for BlockNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockNode")
            .field("name", &self.name)
            .field("format", &self.driver.format_name())
            .field("notifiers", &self.notifiers.len())
            .finish_non_exhaustive()
    }
}
