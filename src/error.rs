//! Defines the custom error types for the email-harvest application.

use std::io;
use thiserror::Error;

/// The primary error type for application-level failures.
#[derive(Error, Debug)]
pub(crate) enum AppError {
    /// Error occurring during configuration loading or validation.
    #[error("Configuration Error: {0}")]
    Config(String),

    /// Error related to file input/output operations.
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    /// Error during JSON serialization or deserialization.
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error building or using the HTTP client.
    #[error("HTTP Request Error: {0}")]
    Request(#[from] reqwest::Error),

    /// Error binding or running the HTTP API server.
    #[error("Server Error: {0}")]
    Server(#[from] warp::Error),

    /// An underlying error that doesn't fit other categories, using anyhow.
    #[error("Generic Error: {0}")]
    Generic(#[from] anyhow::Error),
}

pub(crate) type Result<T> = std::result::Result<T, AppError>;

/// Failure of a single extraction pass over one URL.
///
/// These never escape the `ScrapeResult` they are recorded on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum ScrapeError {
    /// DNS, connection or timeout failure at the static-fetch layer.
    #[error("Fetch error: {0}")]
    Transport(String),

    /// Navigation, timeout or crash at the render layer.
    #[error("Render error: {0}")]
    Render(String),

    /// A response was received but cannot be used (bad URL, non-HTML body, ...).
    #[error("Structural error: {0}")]
    Structural(String),
}

impl ScrapeError {
    /// Transport failures are ambiguous and get a second chance through rendering.
    pub(crate) fn is_transport(&self) -> bool {
        matches!(self, ScrapeError::Transport(_))
    }
}

/// Failure to decode one obfuscated email element.
#[derive(Error, Debug, Clone, PartialEq)]
pub(crate) enum DecodeError {
    #[error("obfuscated payload is empty")]
    Empty,

    #[error("obfuscated payload is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("decoded payload is not valid UTF-8")]
    Utf8,
}
