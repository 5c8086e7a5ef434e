//! Ring Buffer Error Types

use thiserror::Error;

/// Errors raised by ring buffer operations
///
/// These indicate a caller bug (reading more than is buffered, bad
/// construction parameters), never a protocol condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RingBufferError {
    /// Construction parameters cannot describe a working buffer
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Read from an empty buffer
    #[error("Ring buffer is empty")]
    Empty,

    /// Requested more items than are buffered
    #[error("Requested {requested} items but only {available} are buffered")]
    OutOfRange { requested: usize, available: usize },

    /// Growing the buffer would overflow `usize`
    #[error("Ring buffer capacity overflow")]
    CapacityOverflow,
}
