//! Error types for the frame filter

use thiserror::Error;

/// Result type alias for filter operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a filter session
#[derive(Error, Debug)]
pub enum Error {
    /// Absent or malformed config string, or an unknown pixel format
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// The rendering engine runtime could not be brought up
    #[error("Engine runtime failed to load: {0}")]
    RuntimeLoadError(String),

    /// The page failed to load, or browser creation timed out
    #[error("Failed to load page: {0}")]
    LoadError(String),

    /// Frame stride or size inconsistent with its declared dimensions
    #[error("Invalid frame geometry: {0}")]
    GeometryError(String),

    /// Script evaluation failed inside the render process
    #[error("Script execution failed: {0}")]
    ScriptError(String),

    /// Operation timed out
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Render process transport failure
    #[error("Render process I/O failed: {0}")]
    IpcError(String),

    /// The session was shut down or became unusable after a fatal error
    #[error("Session closed: {0}")]
    Closed(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IpcError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::IpcError(format!("malformed message: {}", err))
    }
}
