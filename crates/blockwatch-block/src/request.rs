//! Request descriptors shared by nodes, drivers and notifiers.

use std::fmt;
use std::ops::{BitAnd, BitOr};

use crate::error::{BlockError, Result};

/// Kind of an I/O request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Read data.
    Read,
    /// Write data.
    Write,
    /// Write zeroes without a data buffer.
    WriteZeroes,
    /// Discard (unmap) a range.
    Discard,
}

impl RequestKind {
    /// True for requests that may grow the allocated extent of a device.
    ///
    /// These are the requests a write threshold monitor must see.
    #[inline]
    #[must_use]
    pub const fn is_write_like(self) -> bool {
        !matches!(self, Self::Read)
    }

    /// Short lowercase name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::WriteZeroes => "write-zeroes",
            Self::Discard => "discard",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request flags.
///
/// Drivers advertise which flags they honor through
/// [`BlockDriver::supported_write_flags`](crate::BlockDriver::supported_write_flags)
/// and [`BlockDriver::supported_zero_flags`](crate::BlockDriver::supported_zero_flags).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RequestFlags(u32);

impl RequestFlags {
    /// Force unit access: data is durable when the request completes.
    pub const FUA: Self = Self(1 << 0);
    /// A zero write may deallocate the range instead of writing zeroes.
    pub const MAY_UNMAP: Self = Self(1 << 1);
    /// Fail rather than fall back to a slow path.
    pub const NO_FALLBACK: Self = Self(1 << 2);

    /// No flags.
    #[inline]
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Raw bit representation.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True when every flag in `other` is also set in `self`.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when no flag is set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for RequestFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for RequestFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

/// Allocation status of a run of bytes, as reported by a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockStatus {
    /// Start of the run.
    pub offset: u64,
    /// Length of the run. At least 1 for a non-empty query, never more than
    /// was asked for.
    pub bytes: u64,
    /// The run is backed by allocated storage.
    pub allocated: bool,
    /// The run is known to read as zeroes.
    pub zero: bool,
}

/// Validates a request range against a device length.
///
/// Catches `offset + bytes` overflow so nothing downstream has to.
pub fn check_range(offset: u64, bytes: u64, length: u64) -> Result<()> {
    match offset.checked_add(bytes) {
        Some(end) if end <= length => Ok(()),
        _ => Err(BlockError::OutOfRange {
            offset,
            bytes,
            length,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_like_kinds() {
        assert!(!RequestKind::Read.is_write_like());
        assert!(RequestKind::Write.is_write_like());
        assert!(RequestKind::WriteZeroes.is_write_like());
        assert!(RequestKind::Discard.is_write_like());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(RequestKind::WriteZeroes.to_string(), "write-zeroes");
    }

    #[test]
    fn test_flags_ops() {
        let flags = RequestFlags::FUA | RequestFlags::MAY_UNMAP;
        assert!(flags.contains(RequestFlags::FUA));
        assert!(flags.contains(RequestFlags::MAY_UNMAP));
        assert!(!flags.contains(RequestFlags::NO_FALLBACK));
        assert_eq!(flags & RequestFlags::FUA, RequestFlags::FUA);
        assert!(RequestFlags::empty().is_empty());
        assert!(flags.contains(RequestFlags::empty()));
    }

    #[test]
    fn test_check_range() {
        assert!(check_range(0, 4096, 4096).is_ok());
        assert!(check_range(4096, 0, 4096).is_ok());
        assert!(check_range(4095, 2, 4096).is_err());
        assert!(check_range(u64::MAX, 1, u64::MAX).is_err());
        assert!(matches!(
            check_range(8192, 1, 4096),
            Err(BlockError::OutOfRange {
                offset: 8192,
                bytes: 1,
                length: 4096
            })
        ));
    }
}
