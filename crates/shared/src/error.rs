//! Error types for the record store boundary

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {table}/{key}")]
    NotFound { table: String, key: String },

    #[error("Record store unavailable: {0}")]
    Upstream(String),

    #[error("Malformed record: {0}")]
    Decode(String),

    #[error("Invalid store configuration: {0}")]
    Config(String),
}

impl StoreError {
    pub fn not_found(table: &str, key: &str) -> Self {
        StoreError::NotFound {
            table: table.to_string(),
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Upstream(err.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Upstream(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Decode(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
