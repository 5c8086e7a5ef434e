//! Growable Ring Buffer
//!
//! Provides the circular buffer that holds inbound serial bytes between the
//! transport and the decode pump, plus the search primitives used on it.

mod buffer;
mod error;

pub use buffer::{GrowthPolicy, RingBuffer, DEFAULT_CAPACITY};
pub use error::RingBufferError;
