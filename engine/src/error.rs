//! Error types for the streaming engine.
//!
//! `EngineError` covers problems that prevent a transfer from starting or a
//! verification from running. Problems that happen while bytes are in flight
//! (timeouts, empty reads, hard transport failures) are not errors in this
//! sense: they are retried, logged, or escalated through the cancellation
//! token, and surface later as a failed verification in the run report.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that stop a run before it starts, or stop a verification.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Source file does not exist
    #[error("Source file not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    /// Source file exists but cannot be inspected
    #[error("Source file access denied: {}", path.display())]
    SourceAccessDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Source path is not a regular file
    #[error("Source is not a regular file: {}", path.display())]
    SourceNotAFile { path: PathBuf },

    /// Source file has zero length; nothing to stream
    #[error("Input file not correct (zero length): {}", path.display())]
    EmptySource { path: PathBuf },

    /// Channel count outside the range the transport supports
    #[error("Invalid channel count {count} (supported: 1-{max})")]
    InvalidChannelCount { count: u8, max: u8 },

    /// Stream settings that cannot drive a transfer
    #[error("Invalid stream settings: {reason}")]
    InvalidSettings { reason: String },

    /// Failed to read from a file
    #[error("Failed to read file: {}", path.display())]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl EngineError {
    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::SourceAccessDenied { source, .. } | Self::ReadError { source, .. } => {
                source.raw_os_error()
            }
            _ => None,
        }
    }

    /// True for errors caused by the run configuration rather than I/O.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::SourceNotFound { .. }
                | Self::SourceNotAFile { .. }
                | Self::EmptySource { .. }
                | Self::InvalidChannelCount { .. }
                | Self::InvalidSettings { .. }
        )
    }
}
