//! Error types for the dock daemon

use thiserror::Error;

/// Result type alias for dock operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the dock daemon
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Camera power or capture error
    #[error("camera error: {0}")]
    Camera(String),

    /// Object detection error
    #[error("detection error: {0}")]
    Detection(String),

    /// Evidence upload error
    #[error("upload error: {0}")]
    Upload(String),

    /// Completion notification error
    #[error("notify error: {0}")]
    Notify(String),

    /// Relay, sensor or sound output error
    #[error("actuator error: {0}")]
    Actuator(String),

    /// Credential reader error
    #[error("reader error: {0}")]
    Reader(String),

    /// Image encoding error
    #[error("encode error: {0}")]
    Encode(#[from] image::ImageError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
