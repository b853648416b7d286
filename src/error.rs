//! Error types for docstamp library.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for docstamp operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while rewriting documents.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error when reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The text to replace does not occur in the target paragraph.
    #[error("Text not found: {0}")]
    NotFound(String),

    /// The layout oracle could not open or measure the document.
    #[error("Layout oracle unavailable for {path}: {reason}")]
    OracleUnavailable {
        /// Document the oracle was asked to measure
        path: PathBuf,
        /// Why the oracle failed
        reason: String,
    },

    /// The fully qualified path exceeds the oracle's path-length ceiling.
    #[error("Path is {len} characters long, over the {limit}-character ceiling: {path}")]
    PathTooLong {
        /// Offending path
        path: PathBuf,
        /// Length in characters
        len: usize,
        /// Configured ceiling
        limit: usize,
    },

    /// A handle-level oracle failure (bad paragraph index, malformed output).
    #[error("Layout oracle error: {0}")]
    Oracle(String),

    /// The document file stayed locked beyond the wait bound.
    #[error("Resource busy after {waited_ms}ms: {path}")]
    ResourceContention {
        /// Locked file
        path: PathBuf,
        /// How long we waited before giving up
        waited_ms: u64,
    },

    /// The shrink search reached its floor, fallback included.
    #[error("No acceptable image size on page {page} (floor {floor:.2}in)")]
    SizeExhausted {
        /// Page the search ran for (1-indexed)
        page: u32,
        /// Minimum size that was tried
        floor: f32,
    },

    /// The persisted counter store is unreadable.
    #[error("Counter store is corrupt: {0}")]
    ConfigCorrupt(String),

    /// The document snapshot is structurally invalid.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Generic error with message.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an [`Error::OracleUnavailable`] for a path.
    pub fn oracle_unavailable(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::OracleUnavailable {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ResourceContention { .. })
    }

    /// Whether the failure only affects a single page of a document.
    pub fn is_page_local(&self) -> bool {
        matches!(
            self,
            Error::ResourceContention { .. } | Error::SizeExhausted { .. }
        )
    }

    /// Short, stable label used in reports and the manual review list.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::NotFound(_) => "not_found",
            Error::OracleUnavailable { .. } => "oracle_unavailable",
            Error::PathTooLong { .. } => "path_too_long",
            Error::Oracle(_) => "oracle",
            Error::ResourceContention { .. } => "resource_contention",
            Error::SizeExhausted { .. } => "size_exhausted",
            Error::ConfigCorrupt(_) => "config_corrupt",
            Error::InvalidDocument(_) => "invalid_document",
            Error::Other(_) => "other",
        }
    }
}
