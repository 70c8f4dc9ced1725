//! Error types for the block layer.

use blockwatch_threshold::ThresholdError;
use thiserror::Error;

/// Result type alias for block layer operations.
pub type Result<T> = std::result::Result<T, BlockError>;

/// Errors returned by block nodes and drivers.
#[derive(Debug, Error)]
pub enum BlockError {
    /// Request range overflows or extends past the end of the device.
    ///
    /// Raised before any notifier or filter check sees the request.
    #[error("request out of range: {bytes} bytes at offset {offset} on a {length}-byte device")]
    OutOfRange {
        /// Request start offset.
        offset: u64,
        /// Request length.
        bytes: u64,
        /// Device length at the time of the request.
        length: u64,
    },

    /// A filter option could not be parsed or is out of range.
    #[error("invalid option '{name}': {reason}")]
    InvalidOption {
        /// Option key as given.
        name: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A device lock was poisoned by a panicking writer.
    #[error("poisoned lock: {0}")]
    Poisoned(&'static str),

    /// A crossing event could not be delivered. The request is not
    /// forwarded.
    #[error(transparent)]
    Event(#[from] ThresholdError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_display() {
        let err = BlockError::OutOfRange {
            offset: 4096,
            bytes: 512,
            length: 4096,
        };
        assert_eq!(
            err.to_string(),
            "request out of range: 512 bytes at offset 4096 on a 4096-byte device"
        );
    }

    #[test]
    fn test_invalid_option_display() {
        let err = BlockError::InvalidOption {
            name: "write-threshold".to_string(),
            reason: "expected a number".to_string(),
        };
        assert!(err.to_string().contains("write-threshold"));
        assert!(err.to_string().contains("expected a number"));
    }

    #[test]
    fn test_event_error_is_transparent() {
        let err: BlockError = ThresholdError::EventDelivery("closed".to_string()).into();
        assert_eq!(err.to_string(), "event delivery failed: closed");
    }
}
