//! Error types for boardsync.
//!
//! Library crates use [`BoardSyncError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all boardsync operations.
#[derive(Debug, thiserror::Error)]
pub enum BoardSyncError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while fetching a listing, detail page, or probe target.
    #[error("network error: {0}")]
    Network(String),

    /// HTML parsing or field extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// The store could not be reached or rejected an operation.
    ///
    /// Fatal to the running stage only.
    #[error("storage error: {0}")]
    Storage(String),

    /// The translation capability failed for a single field.
    #[error("translation error: {0}")]
    Translation(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad date, unknown user, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BoardSyncError>;

impl BoardSyncError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Wrap any storage-layer error.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    /// Whether this error means the store is unavailable and the stage must abort.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}
