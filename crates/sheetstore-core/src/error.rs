//! Error types for the data-access core
//!
//! Backend and lease failures propagate to the caller unchanged so it can decide
//! whether to retry, surface the problem, or fall back to a stale read.
//! Coercion problems are never errors: they travel as [`CoercionWarning`]s.

use thiserror::Error;

use crate::schema::TableKind;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Main error type for store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Location unreachable: network, permissions, missing file, or I/O timeout
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Bytes could not be framed as a workbook document
    #[error("Corrupt document: {0}")]
    Corrupt(String),

    /// The document changed since it was last read
    #[error("Write conflict: expected provenance {expected}, found {found}")]
    Conflict { expected: String, found: String },

    /// A value could not be coerced to its column type
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Lease not acquired in time
    #[error("Lock timeout for user {user_id} after {waited_ms}ms")]
    LockTimeout { user_id: String, waited_ms: u64 },

    /// Row ID does not exist
    #[error("Row {id} not found in {table}")]
    NotFound { table: TableKind, id: i64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether the caller may safely retry the whole operation
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_) | StoreError::Conflict { .. } | StoreError::LockTimeout { .. }
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StoreError::Unavailable(format!("request timed out: {}", e))
        } else {
            StoreError::Unavailable(e.to_string())
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Unavailable(format!("snapshot cache: {}", e))
    }
}

/// A value that could not be coerced and was replaced by the null-marker
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CoercionWarning {
    pub table: TableKind,
    /// 1-based data row (header excluded)
    pub row: usize,
    pub column: String,
    pub value: String,
}

impl std::fmt::Display for CoercionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} row {}: could not read {:?} as {}",
            self.table, self.row, self.value, self.column
        )
    }
}
