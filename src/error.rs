//! Error types for db-custom-metrics

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Source query failed: {0}")]
    SourceQuery(#[from] rusqlite::Error),

    #[error("Invalid source row: {0}")]
    InvalidRow(String),

    #[error("Existing data lookup failed: {0}")]
    RemoteIndexFetch(String),

    #[error("Events API request failed with status {status}: {message}")]
    ApiRequest { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Whether the error came out of the source database side of a cycle
    pub fn is_source_error(&self) -> bool {
        matches!(self, SyncError::SourceQuery(_) | SyncError::InvalidRow(_))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
