//! Error types for the renderer.

use thiserror::Error;

/// Workspace-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid stepping parameters or block partition counts.
    ///
    /// Reported synchronously at setup time; values are never clamped.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A storage encoding the voxel sampler cannot normalise.
    #[error("Unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid data error
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Out of bounds access
    #[error("Out of bounds: {0}")]
    OutOfBounds(String),
}

impl Error {
    /// Shorthand for a [`Error::Configuration`] error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Returns true if this error was raised by configuration validation.
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
