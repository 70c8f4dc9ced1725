//! # Write Threshold Filter
//!
//! A pass-through stage inserted between a caller and a device. It owns one
//! [`WriteThreshold`] and sees every request structurally, without any
//! notifier registration:
//!
//! ```text
//!   caller ──▶ [filter node] ──▶ WriteThresholdFilter ──▶ [child node] ──▶ driver
//!                                   │
//!                                   ├─ read / flush / length / status: forward
//!                                   └─ write / zeroes / discard:
//!                                        check_amount, then forward
//! ```
//!
//! Crossing events carry the child's node name, since the child is the
//! device that is filling up.

use std::sync::Arc;

use blockwatch_threshold::{EventSink, Transition, WriteThreshold, WriteThresholdEvent};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::driver::BlockDriver;
use crate::error::Result;
use crate::node::BlockNode;
use crate::options::WriteThresholdOptions;
use crate::request::{BlockStatus, RequestFlags};

/// Format name of the filter driver.
pub const FORMAT_NAME: &str = "write-threshold";

/// Filter driver that watches writes against a threshold and forwards
/// everything to its child.
#[derive(Debug)]
pub struct WriteThresholdFilter {
    child: Arc<BlockNode>,
    threshold: WriteThreshold,
    events: Arc<dyn EventSink>,
    supported_write_flags: RequestFlags,
    supported_zero_flags: RequestFlags,
}

impl WriteThresholdFilter {
    /// Opens the filter over `child` from an option map.
    ///
    /// # Errors
    ///
    /// [`BlockError::InvalidOption`](crate::BlockError::InvalidOption) for an
    /// unknown key or an unparseable value. Nothing is armed on failure.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use blockwatch_block::{BlockNode, MemDevice, WriteThresholdFilter};
    /// use blockwatch_threshold::EventBus;
    /// use serde_json::json;
    ///
    /// let bus = Arc::new(EventBus::default());
    /// let disk = BlockNode::new("disk0", Arc::new(MemDevice::new(1 << 20)), bus.clone());
    /// let options = json!({ "write-threshold": 65536 });
    /// let filter = WriteThresholdFilter::open(disk, options.as_object().unwrap(), bus)?;
    /// assert_eq!(filter.threshold(), 65536);
    /// # Ok::<(), blockwatch_block::BlockError>(())
    /// ```
    pub fn open(
        child: Arc<BlockNode>,
        options: &Map<String, Value>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let options = WriteThresholdOptions::from_map(options)?;
        Ok(Self::with_options(child, options, events))
    }

    /// Opens the filter over `child` from already parsed options.
    #[must_use]
    pub fn with_options(
        child: Arc<BlockNode>,
        options: WriteThresholdOptions,
        events: Arc<dyn EventSink>,
    ) -> Self {
        // Only flags the child can honor are passed through.
        let supported_write_flags = child.supported_write_flags();
        let supported_zero_flags = child.supported_zero_flags();

        debug!(
            child = %child.name(),
            threshold_bytes = options.write_threshold,
            "write-threshold filter opened"
        );

        Self {
            child,
            threshold: WriteThreshold::with_threshold(options.write_threshold),
            events,
            supported_write_flags,
            supported_zero_flags,
        }
    }

    /// The wrapped node.
    #[must_use]
    pub fn child(&self) -> &Arc<BlockNode> {
        &self.child
    }

    /// Current threshold in bytes, `0` when disarmed.
    #[must_use]
    pub fn threshold(&self) -> u64 {
        self.threshold.get()
    }

    /// True when the filter is armed.
    #[must_use]
    pub fn is_threshold_set(&self) -> bool {
        self.threshold.is_set()
    }

    /// Re-arms, moves or disables the threshold.
    pub fn set_threshold(&self, threshold_bytes: u64) -> Transition {
        let transition = self.threshold.set(threshold_bytes);
        if transition == Transition::Ignored {
            warn!(node = %self.child.name(), "ignoring disable request, no write threshold set");
        }
        transition
    }

    fn check_amount(&self, offset: u64, bytes: u64) -> Result<()> {
        let Some(crossing) = self.threshold.check_amount(offset, bytes) else {
            return Ok(());
        };

        info!(
            node = %self.child.name(),
            offset,
            bytes,
            threshold = crossing.threshold,
            amount = crossing.amount,
            "write threshold exceeded"
        );
        let event = WriteThresholdEvent::new(self.child.name(), crossing);
        self.events.emit(event).map_err(|err| {
            warn!(node = %self.child.name(), %err, "write threshold event lost");
            err.into()
        })
    }
}

impl BlockDriver for WriteThresholdFilter {
    fn format_name(&self) -> &'static str {
        FORMAT_NAME
    }

    fn is_filter(&self) -> bool {
        true
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.child.pread(offset, buf)
    }

    fn write(&self, offset: u64, data: &[u8], flags: RequestFlags) -> Result<()> {
        self.check_amount(offset, data.len() as u64)?;
        self.child.pwrite(offset, data, flags)
    }

    fn write_zeroes(&self, offset: u64, bytes: u64, flags: RequestFlags) -> Result<()> {
        self.check_amount(offset, bytes)?;
        self.child.pwrite_zeroes(offset, bytes, flags)
    }

    fn discard(&self, offset: u64, bytes: u64) -> Result<()> {
        self.check_amount(offset, bytes)?;
        self.child.pdiscard(offset, bytes)
    }

    fn flush(&self) -> Result<()> {
        self.child.flush()
    }

    fn length(&self) -> Result<u64> {
        self.child.length()
    }

    fn block_status(&self, offset: u64, bytes: u64) -> Result<BlockStatus> {
        self.child.block_status(offset, bytes)
    }

    fn supported_write_flags(&self) -> RequestFlags {
        self.supported_write_flags
    }

    fn supported_zero_flags(&self) -> RequestFlags {
        self.supported_zero_flags
    }

    fn recurse_is_first_non_filter(&self, candidate: &BlockNode) -> bool {
        self.child.recurse_is_first_non_filter(candidate)
    }
}
