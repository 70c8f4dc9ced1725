//! The driver contract every node delegates to.

use std::fmt;

use crate::error::Result;
use crate::node::BlockNode;
use crate::request::{BlockStatus, RequestFlags};

/// Storage behind a [`BlockNode`].
///
/// Drivers are shared between threads and called concurrently; every
/// method takes `&self`. Ranges passed in have already been validated by the
/// owning node against [`length`](Self::length).
///
/// A filter driver wraps another node and forwards to it; it reports
/// [`is_filter`](Self::is_filter) and answers chain introspection by asking
/// its child.
pub trait BlockDriver: Send + Sync + fmt::Debug {
    /// Format name, e.g. `"memory"` or `"write-threshold"`.
    fn format_name(&self) -> &'static str;

    /// True for pass-through stages that add no data transformation.
    fn is_filter(&self) -> bool {
        false
    }

    /// Fills `buf` with the bytes at `offset`.
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Writes `data` at `offset`.
    fn write(&self, offset: u64, data: &[u8], flags: RequestFlags) -> Result<()>;

    /// Writes `bytes` zeroes at `offset`.
    fn write_zeroes(&self, offset: u64, bytes: u64, flags: RequestFlags) -> Result<()>;

    /// Discards `bytes` at `offset`. Discarded ranges read as zeroes.
    fn discard(&self, offset: u64, bytes: u64) -> Result<()>;

    /// Makes completed writes durable.
    fn flush(&self) -> Result<()>;

    /// Device length in bytes.
    fn length(&self) -> Result<u64>;

    /// Allocation status of the run starting at `offset`, at most `bytes`
    /// long.
    fn block_status(&self, offset: u64, bytes: u64) -> Result<BlockStatus>;

    /// Flags this driver honors on writes.
    fn supported_write_flags(&self) -> RequestFlags {
        RequestFlags::empty()
    }

    /// Flags this driver honors on zero writes.
    fn supported_zero_flags(&self) -> RequestFlags {
        RequestFlags::empty()
    }

    /// Filter drivers only: is `candidate` the first non-filter node below
    /// this stage? Only consulted when [`is_filter`](Self::is_filter) is true.
    fn recurse_is_first_non_filter(&self, _candidate: &BlockNode) -> bool {
        false
    }
}
