//! Error types for capturefile

use std::io;

/// Result type for capturefile operations
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Error kinds observable at the library surface.
#[derive(Debug)]
pub enum CaptureError {
    /// Operation attempted on a handle that has been closed.
    NotOpen,
    /// Write-mode open attempted on a path already open for write in this process.
    AlreadyOpen,
    /// A write-mode-only operation was called on a read-mode handle.
    NotOpenForWrite,
    /// Bad magic, unsupported version, or both master slots invalid.
    InvalidCaptureFile(String),
    /// `record_at` called with n < 1 or n > record_count.
    OutOfRange,
    /// A record or metadata payload exceeded 2^32 - 1 bytes.
    RecordTooLarge,
    /// Underlying I/O failure.
    Io(io::Error),
}

impl std::fmt::Display for CaptureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureError::NotOpen => write!(f, "capture file handle is not open"),
            CaptureError::AlreadyOpen => write!(f, "file is already open for write in this process"),
            CaptureError::NotOpenForWrite => write!(f, "handle is not open for write"),
            CaptureError::InvalidCaptureFile(msg) => write!(f, "invalid capture file: {}", msg),
            CaptureError::OutOfRange => write!(f, "record number out of range"),
            CaptureError::RecordTooLarge => write!(f, "record exceeds 2^32 - 1 bytes"),
            CaptureError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for CaptureError {}

impl From<io::Error> for CaptureError {
    fn from(err: io::Error) -> Self {
        CaptureError::Io(err)
    }
}
