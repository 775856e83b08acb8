use std::io;

use placecard_core::validate::ValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] placecard_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("Unknown field: {0}")]
    UnknownField(String),
    #[error("No value provided")]
    EmptyValue,
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "No record store configured. Pass --seed <records.json> or set SHEETS_SPREADSHEET_ID and SHEETS_ACCESS_TOKEN."
    )]
    NoRecordStore,
}
