//! Errors returned by the DMA engine.
use core::fmt;

/// Any error produced by this crate.
///
/// The recoverable/fatal split matters to callers: [`QueueFull`] and
/// [`Busy`] are transient and retryable, [`RouteTableFull`] and
/// [`OutOfMemory`] are resource exhaustion propagated up after rollback,
/// [`Timeout`] means the hardware never reached an expected state, and
/// [`InvalidArgument`] is a caller bug.
///
/// [`QueueFull`]: Error::QueueFull
/// [`Busy`]: Error::Busy
/// [`RouteTableFull`]: Error::RouteTableFull
/// [`OutOfMemory`]: Error::OutOfMemory
/// [`Timeout`]: Error::Timeout
/// [`InvalidArgument`]: Error::InvalidArgument
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// A hardware ring is at capacity; retry after completions drain.
    QueueFull,
    /// A phy or queue is already reserved, or a queue is not in the
    /// STOPPED/RUNNING state an operation requires.
    Busy,
    /// DMA-coherent buffer allocation failed.
    OutOfMemory,
    /// No free or matching entry in the NoC route table.
    RouteTableFull,
    /// A register poll did not reach the expected value within its window.
    Timeout,
    /// Bad channel id, capacity overflow, misaligned program memory
    /// offset, or similar programmer error.
    InvalidArgument,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => f.write_str("hardware queue full"),
            Self::Busy => f.write_str("resource busy"),
            Self::OutOfMemory => f.write_str("DMA-coherent allocation failed"),
            Self::RouteTableFull => f.write_str("NoC route table full"),
            Self::Timeout => f.write_str("timed out polling hardware status"),
            Self::InvalidArgument => f.write_str("invalid argument"),
        }
    }
}
