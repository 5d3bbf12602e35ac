// src/error.rs

//! Unified error handling for the monitor.

use std::fmt;

use thiserror::Error;

/// Result type alias for monitor operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport failed (connect, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with an error status
    #[error("HTTP status {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Record store failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Crawling error
    #[error("Crawl error for {context}: {message}")]
    Crawl { context: String, message: String },

    /// Headless rendering failed
    #[error("Render error: {0}")]
    Render(String),

    /// Notification delivery failed
    #[error("Notify error: {0}")]
    Notify(String),

    /// Scheduler setup failed
    #[error("Schedule error: {0}")]
    Schedule(String),
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a crawl error with context.
    pub fn crawl(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Crawl {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a render error.
    pub fn render(message: impl fmt::Display) -> Self {
        Self::Render(message.to_string())
    }

    /// Create a notification error.
    pub fn notify(message: impl fmt::Display) -> Self {
        Self::Notify(message.to_string())
    }

    /// Create a scheduler error.
    pub fn schedule(message: impl fmt::Display) -> Self {
        Self::Schedule(message.to_string())
    }

    /// Whether this error came from the network layer and is worth retrying.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_) | Self::HttpStatus { .. })
    }
}
