use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Slack API error on {method}: {message}")]
    Api { method: String, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate limited by Slack (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Invalid URL: {0}")]
    UrlParse(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid week format: {0}")]
    WeekParse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Session expired at {0}")]
    SessionExpired(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Slack's error code, when this is an `ok: false` API response.
    pub fn api_code(&self) -> Option<&str> {
        match self {
            Error::Api { message, .. } => Some(message.as_str()),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<rusqlite_migration::Error> for Error {
    fn from(e: rusqlite_migration::Error) -> Self {
        Error::Migration(e.to_string())
    }
}

impl<E: fmt::Display> From<tokio_rusqlite::Error<E>> for Error {
    fn from(e: tokio_rusqlite::Error<E>) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Other(format!("JSON error: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
