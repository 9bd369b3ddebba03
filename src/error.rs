//! Error types for import runs and row store calls.

use thiserror::Error;

/// Errors that abort an import before any remote write is issued.
#[derive(Debug, Error)]
pub enum ImportError {
    /// The uploaded file could not be turned into a header row plus data rows.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("unsupported file type: .{0} (supported: .csv, .txt, .xlsx, .xlsm, .xls, .xlsb)")]
    UnsupportedFile(String),

    #[error("unknown import kind: {0} (expected products, users or restock)")]
    UnknownKind(String),

    /// Reading the existing keys from the remote store failed.
    #[error("could not load existing records: {0}")]
    Index(#[from] StoreError),
}

/// Errors returned by a [`crate::store::RowStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Postgres rejected the write with SQLSTATE 23505.
    #[error("unique constraint violation: {message}")]
    UniqueViolation { message: String },

    /// The backend answered with a non-success status.
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Network or TLS failure from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("could not decode response for {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// An update or read found no row for the given filter.
    #[error("no {table} row matches {filter}")]
    NotFound { table: String, filter: String },
}

impl StoreError {
    /// Whether retrying the same request might succeed.
    ///
    /// Network failures and 5xx responses are transient. Constraint and
    /// validation failures are not.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Transport(e) => {
                e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
            }
            StoreError::Rejected { status, .. } => *status >= 500,
            StoreError::UniqueViolation { .. }
            | StoreError::Decode { .. }
            | StoreError::NotFound { .. } => false,
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation { .. })
    }
}
