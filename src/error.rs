//! Error types for the model library

use std::path::PathBuf;
use thiserror::Error;

/// Error kinds that can occur while scanning or querying the library
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryErrorKind {
    /// Permission denied when accessing a file or directory
    PermissionDenied,
    /// File or directory not found
    NotFound,
    /// I/O error during file operations
    IoError,
    /// Database operation failed
    DatabaseError,
    /// The store could not be opened even after being recreated
    StoreUnrecoverable,
    /// Invalid path encoding or a path outside the library
    InvalidPath,
    /// A marker manifest could not be read
    ManifestError,
    /// The filesystem watcher could not be started
    WatchError,
    /// Unknown error
    Unknown,
}

/// Represents an error raised by the library
#[derive(Debug, Error)]
#[error("{kind:?}: {message} (path: {path:?})")]
pub struct LibraryError {
    /// The kind of error
    pub kind: LibraryErrorKind,
    /// The path where the error occurred
    pub path: Option<PathBuf>,
    /// Human-readable error message
    pub message: String,
}

pub type Result<T> = std::result::Result<T, LibraryError>;

impl LibraryError {
    /// Create a new library error
    pub fn new(kind: LibraryErrorKind, path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path,
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(path: PathBuf) -> Self {
        Self::new(
            LibraryErrorKind::NotFound,
            Some(path.clone()),
            format!("Not found: {:?}", path),
        )
    }

    /// Create an I/O error
    pub fn io_error(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(LibraryErrorKind::IoError, path, message)
    }

    /// Wrap an I/O error with the path it happened on
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        let mut error = Self::from(err);
        error.path = Some(path.into());
        error
    }

    /// Create a database error
    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(LibraryErrorKind::DatabaseError, None, message)
    }

    /// Create an invalid path error
    pub fn invalid_path(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(LibraryErrorKind::InvalidPath, Some(path), message)
    }

    /// Create a manifest error for a marker file
    pub fn manifest_error(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(LibraryErrorKind::ManifestError, Some(path), message)
    }
}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::PermissionDenied => LibraryErrorKind::PermissionDenied,
            std::io::ErrorKind::NotFound => LibraryErrorKind::NotFound,
            _ => LibraryErrorKind::IoError,
        };
        Self::new(kind, None, err.to_string())
    }
}

impl From<rusqlite::Error> for LibraryError {
    fn from(err: rusqlite::Error) -> Self {
        Self::database_error(err.to_string())
    }
}

impl From<walkdir::Error> for LibraryError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(|p| p.to_path_buf());
        let kind = if err.io_error().map(|e| e.kind()) == Some(std::io::ErrorKind::PermissionDenied)
        {
            LibraryErrorKind::PermissionDenied
        } else {
            LibraryErrorKind::IoError
        };
        Self::new(kind, path, err.to_string())
    }
}

impl From<notify::Error> for LibraryError {
    fn from(err: notify::Error) -> Self {
        let path = err.paths.first().cloned();
        Self::new(LibraryErrorKind::WatchError, path, err.to_string())
    }
}

impl From<serde_json::Error> for LibraryError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(LibraryErrorKind::ManifestError, None, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_kind_mapping() {
        let err = LibraryError::from(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert_eq!(err.kind, LibraryErrorKind::NotFound);

        let err = LibraryError::io_with_path(
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            "/library/a.vrm",
        );
        assert_eq!(err.kind, LibraryErrorKind::PermissionDenied);
        assert_eq!(err.path, Some(PathBuf::from("/library/a.vrm")));
    }

    #[test]
    fn test_display_includes_message() {
        let err = LibraryError::database_error("disk I/O error");
        assert!(err.to_string().contains("disk I/O error"));
        assert!(err.to_string().contains("DatabaseError"));
    }
}
