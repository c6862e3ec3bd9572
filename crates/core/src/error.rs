//! Error types shared by the platform layer and the application.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type outside the RHI.
#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or management errors
    #[error("Window error: {0}")]
    Window(String),

    /// Presentation surface errors
    #[error("Surface error: {0}")]
    Surface(String),

    /// Malformed configuration file
    #[error("Config error in {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Logging could not be installed
    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type alias using the shared Error type.
pub type Result<T> = std::result::Result<T, Error>;
