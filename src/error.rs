//! Defines the application's primary error type `AppError` and a convenience `Result` alias.
//!
//! Uses the `thiserror` crate for ergonomic error definition and provides `From`
//! implementations to convert common external errors into `AppError` variants.
//! Errors that do not implement `Clone` are wrapped in `Arc` to allow `AppError` to be cloneable.

use std::sync::Arc;
use thiserror::Error;

/// The primary error enumeration for all application-specific errors.
#[derive(Error, Debug, Clone)]
pub enum AppError {
    /// A domain constructor or mutator rejected its input.
    #[error("Validation Error: {0}")]
    Validation(String),

    /// A positional tuple or document did not have the expected shape.
    #[error("Format Error: {0}")]
    Format(String),

    /// The requested key does not resolve to a stored record.
    #[error("Not Found: {0}")]
    NotFound(String),

    /// Storage fault that is not a driver error (closed connection, failed upsert, ...).
    #[error("Data Access Error: {0}")]
    DataAccess(String),

    /// Error originating from the relational backend (`sqlx`).
    #[error("Database Error: {0}")]
    Db(Arc<sqlx::Error>),

    /// Error originating from the document backend (`mongodb`).
    #[error("Document Store Error: {0}")]
    Document(Arc<mongodb::error::Error>),

    /// A statement resource could not be read.
    #[error("Statement resource '{resource}' unavailable: {reason}")]
    ResourceUnavailable { resource: String, reason: String },

    /// A statement name was never registered for the loaded resource.
    #[error("Unsupported Operation: {0}")]
    UnsupportedOperation(String),

    /// A raw weather payload is missing required fields.
    #[error("Transform Error: {0}")]
    Transform(String),

    /// Error originating from the OpenWeather HTTP client (`reqwest`).
    #[error("API Error: {0}")]
    Api(Arc<reqwest::Error>),

    /// The geocoding collaborator failed or returned no match.
    #[error("Geocoding Error: {0}")]
    Geocoding(String),

    /// Missing or malformed configuration.
    #[error("Configuration Error: {0}")]
    Config(String),

    /// Error during JSON parsing (`serde_json`). Wrapped in Arc as serde_json::Error is not Clone.
    #[error("JSON Parsing Error: {0}")]
    JsonParse(Arc<serde_json::Error>),

    /// Error related to standard I/O operations.
    #[error("I/O Error: {0}")]
    Io(Arc<std::io::Error>),

    /// Error specific to CLI logic or argument handling.
    #[error("CLI Error: {0}")]
    Cli(String),

    /// Error originating from user interaction prompts (`dialoguer`).
    #[error("Dialoguer Error: {0}")]
    Dialoguer(Arc<dialoguer::Error>),

    /// Error related to progress bar style templating (`indicatif`).
    #[error("Progress Style Template Error: {0}")]
    Template(Arc<indicatif::style::TemplateError>),
}

impl AppError {
    /// True for every variant that denotes a storage/driver fault.
    pub fn is_data_access(&self) -> bool {
        matches!(
            self,
            AppError::DataAccess(_) | AppError::Db(_) | AppError::Document(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }
}

/// A specialized `Result` type using the application's `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

// --- From implementations ---

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Api(Arc::new(err))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Db(Arc::new(err))
    }
}

impl From<mongodb::error::Error> for AppError {
    fn from(err: mongodb::error::Error) -> Self {
        AppError::Document(Arc::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(Arc::new(err))
    }
}

impl From<dialoguer::Error> for AppError {
    fn from(err: dialoguer::Error) -> Self {
        AppError::Dialoguer(Arc::new(err))
    }
}

impl From<indicatif::style::TemplateError> for AppError {
    fn from(err: indicatif::style::TemplateError) -> Self {
        AppError::Template(Arc::new(err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::JsonParse(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_access_grouping() {
        assert!(AppError::DataAccess("closed".into()).is_data_access());
        assert!(AppError::from(sqlx::Error::PoolClosed).is_data_access());
        assert!(!AppError::NotFound("city 1".into()).is_data_access());
        assert!(!AppError::Transform("missing field".into()).is_data_access());
    }

    #[test]
    fn test_not_found_display() {
        let err = AppError::NotFound("city 7".into());
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Not Found: city 7");
    }
}
