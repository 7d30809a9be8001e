//! Unified error types for Switchyard

use crate::gate::Module;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Switchyard operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Appliance config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    // Module document errors
    #[error("Failed to parse document '{path}': {source}")]
    DocumentParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Failed to write document '{path}': {message}")]
    DocumentWrite { path: PathBuf, message: String },

    // Input validation, always raised before any system mutation
    #[error("Invalid input: {0}")]
    Validation(String),

    // Module hierarchy
    #[error("Module '{module}' requires module '{required}' to be active")]
    Dependency { module: Module, required: Module },

    // Resource owned by another subsystem
    #[error("Resource conflict: {0}")]
    StateConflict(String),

    // Privileged command failures
    #[error("Failed to {step}: {message}")]
    ExternalCommand { step: String, message: String },

    #[error("{0}")]
    ApplyFailed(String),

    #[error("Incomplete configuration: {0}")]
    IncompleteConfiguration(String),

    #[error("{0} is not configured")]
    NotConfigured(String),

    #[error("Interface '{0}' not found")]
    InterfaceNotFound(String),

    #[error("DHCP error: {0}")]
    DhcpFailed(String),
}

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, nothing was touched
    Validation,
    /// An upstream module is inactive
    Dependency,
    /// Resource claimed by another subsystem
    StateConflict,
    /// A privileged command failed or timed out
    ExternalCommand,
    /// Reading or writing local files
    Storage,
}

impl Error {
    /// Classify this error into the control plane taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_)
            | Error::ConfigValidation(_)
            | Error::NotConfigured(_)
            | Error::InterfaceNotFound(_) => ErrorKind::Validation,
            Error::Dependency { .. } => ErrorKind::Dependency,
            Error::StateConflict(_) => ErrorKind::StateConflict,
            Error::ExternalCommand { .. }
            | Error::ApplyFailed(_)
            | Error::IncompleteConfiguration(_)
            | Error::DhcpFailed(_) => ErrorKind::ExternalCommand,
            Error::Io(_)
            | Error::ConfigRead { .. }
            | Error::ConfigParse(_)
            | Error::DocumentParse { .. }
            | Error::DocumentWrite { .. } => ErrorKind::Storage,
        }
    }
}

/// Result type alias for Switchyard operations
pub type Result<T> = std::result::Result<T, Error>;
