//! Error types for the streak keeper

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Cookies file not found: {0}")]
    CookiesNotFound(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Browser automation error: {0}")]
    Automation(String),

    #[error("A streak run is already in progress")]
    RunAlreadyInProgress,

    #[error("Contact already exists: {0}")]
    AlreadyExists(String),

    #[error("Contact not found: {0}")]
    NotFound(String),

    #[error("Failed to acquire run lock: {0}")]
    LockError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}
