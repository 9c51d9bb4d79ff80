mod chunked;

pub use chunked::{ChunkedTransferEngine, PROGRESS_THRESHOLD};

use thiserror::Error;

use crate::core::share::ShareError;

/// Why a single transfer attempt failed.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Local file error: {0}")]
    LocalIo(#[source] std::io::Error),

    #[error("Share operation failed: {0}")]
    Share(#[from] ShareError),

    #[error("Checksum mismatch (expected {expected}, got {actual})")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Short write at offset {offset}: {written} of {expected} bytes accepted")]
    ShortWrite {
        offset: u64,
        expected: usize,
        written: usize,
    },
}

impl TransferError {
    pub fn is_checksum_mismatch(&self) -> bool {
        matches!(self, Self::ChecksumMismatch { .. })
    }
}
