//! Output stream error types
//!
//! Two layers of errors exist:
//! - [`StreamError`] is what Rust callers of [`crate::StreamOut`] and
//!   [`crate::StreamWriter`] see.
//! - [`ResultCode`] is the plain code carried inside a [`crate::WriteStatus`]
//!   reply, so a failure on the write thread crosses the status queue as data
//!   instead of unwinding.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by output stream operations
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    /// Malformed parameters (buffer geometry, volume, effect ids)
    #[error("Invalid arguments")]
    InvalidArguments,

    /// Operation attempted in the wrong lifecycle phase
    #[error("Invalid state")]
    InvalidState,

    /// Capability intentionally not implemented by this stream
    #[error("Not supported")]
    NotSupported,

    /// Client side only: no status reply arrived before the deadline
    #[error("Timed out waiting for the write thread")]
    Timeout,
}

/// Result type for output stream operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Result code carried in status replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResultCode {
    #[default]
    Ok,
    InvalidArguments,
    InvalidState,
    NotSupported,
}

impl ResultCode {
    /// Convert into a `Result`, mapping `Ok` to `Ok(())`
    pub fn into_result(self) -> StreamResult<()> {
        match self {
            ResultCode::Ok => Ok(()),
            ResultCode::InvalidArguments => Err(StreamError::InvalidArguments),
            ResultCode::InvalidState => Err(StreamError::InvalidState),
            ResultCode::NotSupported => Err(StreamError::NotSupported),
        }
    }
}

impl From<StreamError> for ResultCode {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::InvalidArguments => ResultCode::InvalidArguments,
            StreamError::InvalidState | StreamError::Timeout => ResultCode::InvalidState,
            StreamError::NotSupported => ResultCode::NotSupported,
        }
    }
}

/// Errors raised while building the transfer queues
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// A queue needs at least one slot
    #[error("Queue capacity must be non-zero")]
    ZeroCapacity,

    /// Requested size exceeds the shared allocation cap
    #[error("Queue of {requested} bytes exceeds the {limit} byte limit")]
    TooLarge { requested: usize, limit: usize },

    /// The allocator refused the backing buffer
    #[error("Failed to allocate {0} bytes for queue")]
    Allocation(usize),
}

/// Errors reported by a sink factory when the device cannot be opened
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Output device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Unsupported audio config: {0}")]
    UnsupportedConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_code_roundtrip() {
        for err in [
            StreamError::InvalidArguments,
            StreamError::InvalidState,
            StreamError::NotSupported,
        ] {
            assert_eq!(ResultCode::from(err).into_result(), Err(err));
        }
        assert_eq!(ResultCode::Ok.into_result(), Ok(()));
    }

    #[test]
    fn test_timeout_maps_to_invalid_state() {
        assert_eq!(ResultCode::from(StreamError::Timeout), ResultCode::InvalidState);
    }
}
