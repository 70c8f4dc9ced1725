//! # Memory Device
//!
//! A thin-provisioned in-memory disk. Storage is allocated per cluster on
//! first write, so a large device that is mostly empty costs almost
//! nothing, and the allocated extent grows the way a thin-provisioned
//! volume's would.
//!
//! | Operation | Effect on allocation |
//! |-----------|----------------------|
//! | write | Allocates every touched cluster |
//! | write-zeroes | Deallocates fully covered clusters with `MAY_UNMAP`, otherwise allocates |
//! | discard | Deallocates fully covered clusters, zeroes partial ones in place |
//! | resize | Shrinking drops clusters past the new end |

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::driver::BlockDriver;
use crate::error::{BlockError, Result};
use crate::request::{check_range, BlockStatus, RequestFlags};

/// Allocation granularity of [`MemDevice`].
pub const CLUSTER_SIZE: u64 = 4096;

/// Format name reported by [`MemDevice`].
pub const MEMORY_FORMAT: &str = "memory";

#[derive(Debug, Default)]
struct MemInner {
    length: u64,
    clusters: BTreeMap<u64, Box<[u8]>>,
}

/// Sparse in-memory block device.
///
/// # Example
///
/// ```rust
/// use blockwatch_block::{BlockDriver, MemDevice, RequestFlags};
///
/// let device = MemDevice::new(1 << 20);
/// device.write(8192, b"hello", RequestFlags::empty())?;
///
/// let mut buf = [0u8; 5];
/// device.read(8192, &mut buf)?;
/// assert_eq!(&buf, b"hello");
/// assert_eq!(device.allocated_bytes()?, 4096);
/// # Ok::<(), blockwatch_block::BlockError>(())
/// ```
#[derive(Debug, Default)]
pub struct MemDevice {
    inner: RwLock<MemInner>,
}

impl MemDevice {
    /// Creates an empty device of `length` bytes. Nothing is allocated.
    #[must_use]
    pub fn new(length: u64) -> Self {
        Self {
            inner: RwLock::new(MemInner {
                length,
                clusters: BTreeMap::new(),
            }),
        }
    }

    /// Changes the device length.
    ///
    /// Growing exposes zeroes. Shrinking discards everything past the new
    /// end; a later grow does not bring it back.
    pub fn resize(&self, length: u64) -> Result<()> {
        let mut inner = self.write_lock("resize")?;
        if length < inner.length {
            let first_dropped = length.div_ceil(CLUSTER_SIZE);
            let dropped = inner.clusters.split_off(&first_dropped);
            debug!(clusters = dropped.len(), "memory device shrunk");

            // Zero the tail of a partially kept last cluster.
            let within = (length % CLUSTER_SIZE) as usize;
            if within != 0 {
                if let Some(cluster) = inner.clusters.get_mut(&(length / CLUSTER_SIZE)) {
                    cluster[within..].fill(0);
                }
            }
        }
        debug!(from = inner.length, to = length, "memory device resized");
        inner.length = length;
        Ok(())
    }

    /// Bytes of backing storage currently allocated.
    pub fn allocated_bytes(&self) -> Result<u64> {
        let inner = self.read_lock("allocated_bytes")?;
        Ok(inner.clusters.len() as u64 * CLUSTER_SIZE)
    }

    fn read_lock(&self, context: &'static str) -> Result<RwLockReadGuard<'_, MemInner>> {
        self.inner.read().map_err(|_| BlockError::Poisoned(context))
    }

    fn write_lock(&self, context: &'static str) -> Result<RwLockWriteGuard<'_, MemInner>> {
        self.inner.write().map_err(|_| BlockError::Poisoned(context))
    }
}

/// Splits `[offset, offset + bytes)` into per-cluster pieces:
/// `(cluster index, offset within cluster, piece length)`.
fn cluster_pieces(offset: u64, bytes: u64) -> impl Iterator<Item = (u64, usize, usize)> {
    let end = offset + bytes;
    let mut pos = offset;
    std::iter::from_fn(move || {
        if pos >= end {
            return None;
        }
        let index = pos / CLUSTER_SIZE;
        let within = pos % CLUSTER_SIZE;
        let len = (CLUSTER_SIZE - within).min(end - pos);
        pos += len;
        Some((index, within as usize, len as usize))
    })
}

fn new_cluster() -> Box<[u8]> {
    vec![0u8; CLUSTER_SIZE as usize].into_boxed_slice()
}

impl BlockDriver for MemDevice {
    fn format_name(&self) -> &'static str {
        MEMORY_FORMAT
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let inner = self.read_lock("read")?;
        check_range(offset, buf.len() as u64, inner.length)?;

        let mut done = 0;
        for (index, within, len) in cluster_pieces(offset, buf.len() as u64) {
            let dst = &mut buf[done..done + len];
            match inner.clusters.get(&index) {
                Some(cluster) => dst.copy_from_slice(&cluster[within..within + len]),
                None => dst.fill(0),
            }
            done += len;
        }
        Ok(())
    }

    fn write(&self, offset: u64, data: &[u8], _flags: RequestFlags) -> Result<()> {
        let mut inner = self.write_lock("write")?;
        check_range(offset, data.len() as u64, inner.length)?;

        let mut done = 0;
        for (index, within, len) in cluster_pieces(offset, data.len() as u64) {
            let cluster = inner.clusters.entry(index).or_insert_with(new_cluster);
            cluster[within..within + len].copy_from_slice(&data[done..done + len]);
            done += len;
        }
        Ok(())
    }

    fn write_zeroes(&self, offset: u64, bytes: u64, flags: RequestFlags) -> Result<()> {
        let mut inner = self.write_lock("write_zeroes")?;
        check_range(offset, bytes, inner.length)?;

        let may_unmap = flags.contains(RequestFlags::MAY_UNMAP);
        for (index, within, len) in cluster_pieces(offset, bytes) {
            if may_unmap && len as u64 == CLUSTER_SIZE {
                inner.clusters.remove(&index);
            } else {
                let cluster = inner.clusters.entry(index).or_insert_with(new_cluster);
                cluster[within..within + len].fill(0);
            }
        }
        Ok(())
    }

    fn discard(&self, offset: u64, bytes: u64) -> Result<()> {
        let mut inner = self.write_lock("discard")?;
        check_range(offset, bytes, inner.length)?;

        for (index, within, len) in cluster_pieces(offset, bytes) {
            if len as u64 == CLUSTER_SIZE {
                inner.clusters.remove(&index);
            } else if let Some(cluster) = inner.clusters.get_mut(&index) {
                cluster[within..within + len].fill(0);
            }
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn length(&self) -> Result<u64> {
        Ok(self.read_lock("length")?.length)
    }

    fn block_status(&self, offset: u64, bytes: u64) -> Result<BlockStatus> {
        let inner = self.read_lock("block_status")?;
        check_range(offset, bytes, inner.length)?;

        let mut pieces = cluster_pieces(offset, bytes);
        let Some((first, _, first_len)) = pieces.next() else {
            return Ok(BlockStatus {
                offset,
                bytes: 0,
                allocated: false,
                zero: true,
            });
        };

        let allocated = inner.clusters.contains_key(&first);
        let mut run = first_len as u64;
        for (index, _, len) in pieces {
            if inner.clusters.contains_key(&index) != allocated {
                break;
            }
            run += len as u64;
        }

        Ok(BlockStatus {
            offset,
            bytes: run,
            allocated,
            zero: !allocated,
        })
    }

    fn supported_write_flags(&self) -> RequestFlags {
        RequestFlags::FUA
    }

    fn supported_zero_flags(&self) -> RequestFlags {
        RequestFlags::FUA | RequestFlags::MAY_UNMAP
    }
}
