//! Byte-exact comparison of a source file and the file received for it.
//!
//! Lengths are compared first; only equal-length files are streamed block by
//! block. The first differing block is scanned to locate the exact offset.
//! Neither file is ever modified.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::EngineError;

/// Comparison block size.
pub const BLOCK_SIZE: usize = 4096;

/// Result of comparing two files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum VerifyOutcome {
    /// Same length, same bytes
    Identical { length: u64 },
    /// Lengths differ; no bytes were compared
    SizeMismatch { source_len: u64, destination_len: u64 },
    /// Same length, first differing byte at `offset`
    ContentMismatch { offset: u64 },
    /// One of the files could not be opened or read
    Unreadable { path: PathBuf, reason: String },
}

impl VerifyOutcome {
    pub fn is_identical(&self) -> bool {
        matches!(self, Self::Identical { .. })
    }
}

/// Compare `source` and `destination` byte for byte.
///
/// # Errors
/// Returns `EngineError::ReadError` if either file cannot be opened, sized
/// or read. A difference in length or content is not an error.
pub fn compare(source: &Path, destination: &Path) -> Result<VerifyOutcome, EngineError> {
    let (mut src, source_len) = open_sized(source)?;
    let (mut dst, destination_len) = open_sized(destination)?;

    if source_len != destination_len {
        return Ok(VerifyOutcome::SizeMismatch {
            source_len,
            destination_len,
        });
    }

    let mut src_block = [0u8; BLOCK_SIZE];
    let mut dst_block = [0u8; BLOCK_SIZE];
    let mut remaining = source_len;

    while remaining > 0 {
        let size = (BLOCK_SIZE as u64).min(remaining) as usize;
        read_block(&mut src, source, &mut src_block[..size])?;
        read_block(&mut dst, destination, &mut dst_block[..size])?;

        if src_block[..size] != dst_block[..size] {
            let index = src_block[..size]
                .iter()
                .zip(&dst_block[..size])
                .position(|(a, b)| a != b)
                .unwrap_or(0);
            let offset = source_len - remaining + index as u64;
            return Ok(VerifyOutcome::ContentMismatch { offset });
        }

        remaining -= size as u64;
    }

    Ok(VerifyOutcome::Identical { length: source_len })
}

/// Compare and log the verdict; read failures become `Unreadable`.
pub fn verify(source: &Path, destination: &Path) -> VerifyOutcome {
    let outcome = match compare(source, destination) {
        Ok(outcome) => outcome,
        Err(e) => {
            let path = match &e {
                EngineError::ReadError { path, .. } => path.clone(),
                _ => destination.to_path_buf(),
            };
            let reason = std::error::Error::source(&e)
                .map(|s| format!("{}: {}", e, s))
                .unwrap_or_else(|| e.to_string());
            VerifyOutcome::Unreadable { path, reason }
        }
    };

    let dest = destination.display();
    match &outcome {
        VerifyOutcome::Identical { length } => {
            tracing::info!(%dest, length, "binary same");
        }
        VerifyOutcome::SizeMismatch {
            source_len,
            destination_len,
        } => {
            tracing::error!(%dest, source_len, destination_len, "size not same");
        }
        VerifyOutcome::ContentMismatch { offset } => {
            tracing::error!(%dest, offset, "content not same");
        }
        VerifyOutcome::Unreadable { path, reason } => {
            tracing::error!(path = %path.display(), %reason, "verification could not read file");
        }
    }

    outcome
}

fn open_sized(path: &Path) -> Result<(File, u64), EngineError> {
    let read_error = |source| EngineError::ReadError {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).map_err(read_error)?;
    let len = file.seek(SeekFrom::End(0)).map_err(read_error)?;
    file.seek(SeekFrom::Start(0)).map_err(read_error)?;
    Ok((file, len))
}

fn read_block(file: &mut File, path: &Path, block: &mut [u8]) -> Result<(), EngineError> {
    file.read_exact(block).map_err(|source| EngineError::ReadError {
        path: path.to_path_buf(),
        source,
    })
}
