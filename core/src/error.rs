//! Error type shared by every table, session and scanner operation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("schema error: {0}")]
    Schema(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("duplicate key {key}")]
    DuplicateKey { key: String },
    #[error("key {key} not found")]
    NotFound { key: String },
    #[error("mutation buffer is full ({capacity} pending intents)")]
    BufferFull { capacity: usize },
    #[error("session is closed")]
    SessionClosed,
    #[error("invalid scan configuration: {0}")]
    InvalidScanConfig(String),
    #[error("operation timed out")]
    Timeout,
    #[error("table {0} already exists")]
    TableAlreadyExists(String),
    #[error("table {0} not found")]
    TableNotFound(String),
}

impl Error {
    pub(crate) fn schema(msg: impl Into<String>) -> Self {
        Error::Schema(msg.into())
    }

    pub(crate) fn scan_config(msg: impl Into<String>) -> Self {
        Error::InvalidScanConfig(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Error::DuplicateKey { .. })
    }
}
