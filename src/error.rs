//! FleetSync Error Types

use thiserror::Error;

use crate::context::Feature;
use crate::database::QueryErrorKind;

/// Result type alias for FleetSync operations
pub type Result<T> = std::result::Result<T, Error>;

/// FleetSync error types
///
/// Failures of individual database requests never show up here directly:
/// workers report them as [`crate::database::QueryError`] values. Only the
/// completion dispatcher turns one of those into an `Error`, and only when
/// the failure is fatal for the feature that issued the request.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Request errors
    #[error("Request '{request}' failed fatally ({kind}): {message}")]
    FatalRequest {
        request: String,
        kind: QueryErrorKind,
        message: String,
    },

    #[error("Result for '{0}' arrived after the owning process stopped")]
    ProcessInactive(String),

    // Worker pool errors
    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("The {0} feature is disabled because its schema check failed")]
    FeatureDisabled(Feature),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Check if this error must stop the control loop
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::FatalRequest { .. } | Error::ProcessInactive(_) | Error::ShuttingDown
        )
    }
}
