//! Error types for placecard-core

use thiserror::Error;

use crate::models::FieldKind;
use crate::photo::PhotoError;
use crate::session::SessionError;
use crate::store::StoreError;
use crate::sync::SyncError;
use crate::validate::{ReasonCode, ValidationError};

/// Result type alias using placecard-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in placecard-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// A raw field value failed validation
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A typed value failed re-validation while applying a change set
    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: FieldKind, reason: ReasonCode },

    /// Editing session error
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Spreadsheet synchronization error
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Photo asset error
    #[error(transparent)]
    Photo(#[from] PhotoError),

    /// Record or file store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(error) => error.reason.as_str(),
            Self::InvalidField { .. } => "invalid_field",
            Self::Session(error) => error.code(),
            Self::Sync(error) => error.code(),
            Self::Photo(error) => error.code(),
            Self::Store(error) => error.code(),
            Self::InvalidInput(_) => "invalid_input",
            Self::Config(_) => "invalid_config",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
        }
    }
}
