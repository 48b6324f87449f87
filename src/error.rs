//! Error types for the loader.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// Errors that can occur while resolving identifiers or loading data from an archive.
///
/// Identifier resolution misses are usually absorbed into "no data" by the loader.
/// The remaining errors are reported for the request that triggered them.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The archive or the requested object does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A blob identifier string could not be decoded.
    #[error("Malformed blob id: {0}")]
    MalformedBlobId(String),

    /// An external identifier does not have the expected structure.
    #[error("Malformed external id: {0}")]
    MalformedExternalId(String),

    /// A read identifier has an invalid spot or read number.
    #[error("Invalid read or spot id: {0}")]
    InvalidReadOrSpotId(String),

    /// The archive exists but could not be opened.
    #[error("Failed to open archive {}: {message}", path.display())]
    ArchiveOpenFailure {
        /// Path to the archive.
        path: PathBuf,
        /// Reason reported by the storage layer.
        message: String,
    },

    /// The same external identifier resolves to different archives.
    #[error("Identifier {id} found in both {first} and {second}")]
    ConflictingResolution {
        /// The identifier.
        id: String,
        /// Name of the first archive.
        first: String,
        /// Name of the second archive.
        second: String,
    },

    /// An alignment operation string could not be decoded.
    #[error("Invalid CIGAR: {0}")]
    InvalidCigar(String),

    /// The chunk identifier does not match the blob.
    #[error("Invalid chunk: {0}")]
    InvalidChunk(String),

    /// Invalid input data or parameters.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The request was cancelled by the caller.
    #[error("Request cancelled")]
    Cancelled,

    /// Error from the storage layer.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoaderError {
    /// Returns `true` if the error means that the requested object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LoaderError::NotFound(_))
    }
}
