//! The duplex transport seam.
//!
//! The engine only needs an opened, timeout-capable handle that moves chunks
//! on a numbered channel in both directions. How it was discovered, opened or
//! configured is not the engine's concern.

use std::fmt;
use std::time::Duration;

/// Status reported by a single transport call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// The call completed
    Success,
    /// Nothing moved before the per-call timeout elapsed
    Timeout,
    /// Any other failure, carrying the transport's status code
    Failed { code: u32 },
}

impl TransferStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "ok"),
            Self::Timeout => write!(f, "timeout"),
            Self::Failed { code } => write!(f, "error {}", code),
        }
    }
}

/// Result of a single transport call: how many bytes moved, and the status.
///
/// The two are independent; a timed-out read may still report bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOutcome {
    pub transferred: usize,
    pub status: TransferStatus,
}

impl TransferOutcome {
    pub fn success(transferred: usize) -> Self {
        TransferOutcome {
            transferred,
            status: TransferStatus::Success,
        }
    }

    pub fn timeout() -> Self {
        TransferOutcome {
            transferred: 0,
            status: TransferStatus::Timeout,
        }
    }

    pub fn failed(code: u32) -> Self {
        TransferOutcome {
            transferred: 0,
            status: TransferStatus::Failed { code },
        }
    }
}

/// An opened duplex handle with timed, chunked primitives per channel.
///
/// Implementations must tolerate one writer and one reader per channel
/// calling concurrently, across all channels at once.
pub trait DuplexTransport: Send + Sync {
    /// Push `data` into `channel`, blocking for at most `timeout`.
    fn write_chunk(&self, channel: u8, data: &[u8], timeout: Duration) -> TransferOutcome;

    /// Pull up to `buf.len()` bytes from `channel`, blocking for at most `timeout`.
    fn read_chunk(&self, channel: u8, buf: &mut [u8], timeout: Duration) -> TransferOutcome;
}
