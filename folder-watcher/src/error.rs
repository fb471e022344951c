//! Error types for the folder watcher.

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors that can occur while starting or running a watcher.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// The watched folder does not exist.
    #[error("directory not found: {0}")]
    DirectoryNotFound(String),

    /// The folder exists but could not be opened for watching.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The configured strategy is not available on this platform.
    #[error("watch strategy not supported on this platform: {0}")]
    UnsupportedStrategy(&'static str),

    /// The watcher was disposed and cannot be started again.
    #[error("watcher has been disposed")]
    Disposed,

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
