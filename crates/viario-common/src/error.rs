//! Error types for the viario pipeline

use thiserror::Error;

/// Result type alias for viario operations
pub type Result<T> = std::result::Result<T, ViarioError>;

/// Main error type for the viario pipeline
#[derive(Error, Debug)]
pub enum ViarioError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Workbook error: {0}")]
    Workbook(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Input directory not found: {0}")]
    InputDirNotFound(String),

    #[error("No usable input for stage {0}")]
    NoUsableInput(String),
}
