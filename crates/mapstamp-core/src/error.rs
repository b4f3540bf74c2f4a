//! Error types for the mapstamp-core library.
//!
//! Decode-level failures (truncation, bad magic, corrupt zlib streams, a
//! missing external tool) are recoverable: they make a fallback tier skip or
//! a single file be reported and left alone. Filesystem failures on the final
//! placement step are not.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for mapstamp operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for all mapstamp operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A decoder ran out of bytes
    #[error("truncated input at offset {offset}: needed {needed} more byte(s)")]
    Truncated {
        /// Byte offset where the read was attempted
        offset: usize,
        /// Number of bytes the read required
        needed: usize,
    },

    /// The input does not start with the Mapsforge magic string
    #[error("not a mapsforge binary map file (bad magic)")]
    BadMagic,

    /// A zlib-compressed blob could not be inflated
    #[error("failed to decompress zlib blob: {0}")]
    Decompression(#[source] std::io::Error),

    /// The external introspection tool is missing or failed
    #[error("external tool '{tool}' unavailable: {reason}")]
    ToolUnavailable {
        /// Program that was invoked
        tool: String,
        /// Why its result could not be used
        reason: String,
    },

    /// A decoded field held a value that cannot be used
    #[error("invalid field value: {0}")]
    InvalidField(String),

    /// Failed to read input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to remove an existing file at the target path
    #[error("failed to remove existing file '{path}': {source}")]
    FileRemove {
        /// Path to the file that could not be removed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to move the output file into place
    #[error("failed to rename '{from}' to '{to}': {source}")]
    FileRename {
        /// Source path
        from: PathBuf,
        /// Target path
        to: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to create output directory
    #[error("failed to create directory '{path}': {source}")]
    DirectoryCreate {
        /// Path to the directory that failed to create
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Every timestamp strategy came up empty
    #[error("no timestamp could be resolved for '{path}'")]
    NoTimestamp {
        /// File whose date was requested
        path: PathBuf,
    },
}

impl Error {
    /// Creates a new truncation error
    pub fn truncated(offset: usize, needed: usize) -> Self {
        Self::Truncated { offset, needed }
    }

    /// Creates a new tool-unavailable error
    pub fn tool_unavailable(tool: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ToolUnavailable {
            tool: tool.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new invalid-field error
    pub fn invalid_field(msg: impl Into<String>) -> Self {
        Self::InvalidField(msg.into())
    }

    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new file removal error
    pub fn file_remove(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRemove {
            path: path.into(),
            source,
        }
    }

    /// Creates a new rename error
    pub fn file_rename(
        from: impl Into<PathBuf>,
        to: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::FileRename {
            from: from.into(),
            to: to.into(),
            source,
        }
    }

    /// Creates a new directory creation error
    pub fn directory_create(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DirectoryCreate {
            path: path.into(),
            source,
        }
    }

    /// Returns true if this error should skip a tier or a file rather than
    /// abort the run
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. }
                | Self::BadMagic
                | Self::Decompression(_)
                | Self::ToolUnavailable { .. }
                | Self::InvalidField(_)
        )
    }
}
