// src/error.rs

//! Unified error handling for the news pipeline.

use std::fmt;

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// SQLite statement failed
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// SQLite connection worker failed
    #[error("Database connection error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

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

    /// Headless browser session failed
    #[error("Browser error: {0}")]
    Browser(String),

    /// Classification service returned something unusable
    #[error("Classification error: {0}")]
    Classification(String),

    /// Push service rejected the request
    #[error("Push error: {0}")]
    Push(String),

    /// Schedule expression or timing error
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

    pub fn browser(message: impl fmt::Display) -> Self {
        Self::Browser(message.to_string())
    }

    pub fn classification(message: impl fmt::Display) -> Self {
        Self::Classification(message.to_string())
    }

    pub fn push(message: impl fmt::Display) -> Self {
        Self::Push(message.to_string())
    }

    pub fn schedule(message: impl fmt::Display) -> Self {
        Self::Schedule(message.to_string())
    }
}
