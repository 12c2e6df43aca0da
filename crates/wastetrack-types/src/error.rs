//! Error types for wastetrack

use thiserror::Error;

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration not found")]
    NotFound,

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Failed to save configuration: {0}")]
    SaveError(String),

    #[error("Invalid configuration value: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The geospatial index could not be reached. Never retried.
    #[error("Geospatial index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Geospatial index error: {0}")]
    Index(String),

    #[error("Queue delivery failed after {attempts} attempt(s): {last_error}")]
    DeliveryFailed { attempts: u32, last_error: String },

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Parquet error: {0}")]
    Parquet(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Lease on {key} is held by {holder}")]
    LeaseHeld { key: String, holder: String },
}

impl Error {
    /// Errors that must abort the whole invocation rather than a single record.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::IndexUnavailable(_)
                | Error::Index(_)
                | Error::Io(_)
                | Error::Storage(_)
                | Error::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
