//! Error types for xcube operations

use thiserror::Error;

/// Main error type for data cube operations
#[derive(Error, Debug)]
pub enum XcubeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    #[error("Storage backend error: {0}")]
    StorageBackend(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid data type: {0}")]
    InvalidDataType(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Read-only: {0}")]
    ReadOnly(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Specialized Result type for xcube operations
pub type Result<T> = std::result::Result<T, XcubeError>;

impl From<serde_json::Error> for XcubeError {
    fn from(err: serde_json::Error) -> Self {
        XcubeError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for XcubeError {
    fn from(err: serde_yaml::Error) -> Self {
        XcubeError::Serialization(err.to_string())
    }
}

impl From<ndarray::ShapeError> for XcubeError {
    fn from(err: ndarray::ShapeError) -> Self {
        XcubeError::InvalidDimensions(err.to_string())
    }
}
