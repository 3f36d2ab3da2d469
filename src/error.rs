//! Error types for the area and coverage indexes.

use std::path::PathBuf;

use thiserror::Error;

use crate::models::TypeId;

/// Index errors.
#[derive(Error, Debug)]
pub enum IndexError {
    /// IO error during index read/write.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Index file contents are inconsistent (truncated, bad bounds, size mismatch).
    #[error("Corrupt index file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Continuation bit still set on the last available byte.
    #[error("Truncated varint")]
    TruncatedVarint,

    /// Encoded value does not fit into 64 bits.
    #[error("Varint overflow")]
    VarintOverflow,

    /// Read past the end of the underlying file.
    #[error("Unexpected end of file at offset {offset} (wanted {wanted} bytes, file has {len})")]
    UnexpectedEof { offset: u64, wanted: usize, len: u64 },

    /// The index has been closed.
    #[error("Index is closed")]
    Closed,

    /// Type id not known to the type configuration.
    #[error("Unknown type id {0}")]
    UnknownType(TypeId),

    /// Magnification level outside the supported range.
    #[error("Invalid level {0}")]
    InvalidLevel(u32),

    /// Index builder could not represent its input.
    #[error("Build error: {0}")]
    Build(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl IndexError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        IndexError::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// True for errors caused by the file contents rather than by the environment.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            IndexError::Corrupt { .. }
                | IndexError::TruncatedVarint
                | IndexError::VarintOverflow
                | IndexError::UnexpectedEof { .. }
        )
    }
}

/// Result type for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;
