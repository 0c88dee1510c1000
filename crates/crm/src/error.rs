use thiserror::Error;

use crate::outcome::DiagnosticKind;

/// Failure of a single request/response cycle against the reporting endpoint.
///
/// Callers treat every variant as "no data"; the variant only feeds
/// diagnostics and logs.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request did not complete within the client timeout.
    #[error("request for table '{table}' timed out")]
    Timeout { table: String },
    /// Connection refused, DNS failure, TLS failure, etc.
    #[error("transport error for table '{table}': {message}")]
    Transport { table: String, message: String },
    /// Any HTTP status other than 200.
    #[error("table '{table}' returned HTTP {status}: {body}")]
    Status {
        table: String,
        status: u16,
        body: String,
    },
    /// 200 with a body that is not valid JSON.
    #[error("table '{table}' returned malformed JSON: {message}")]
    Decode { table: String, message: String },
    /// 200 with an in-band `error` mapping.
    #[error("table '{table}' reported error '{code}': {description}")]
    Api {
        table: String,
        code: String,
        description: String,
    },
    /// The HTTP client itself could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl FetchError {
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            Self::Timeout { .. } | Self::Transport { .. } | Self::Client(_) => {
                DiagnosticKind::Transport
            }
            Self::Status { .. } | Self::Decode { .. } | Self::Api { .. } => {
                DiagnosticKind::Protocol
            }
        }
    }
}

/// Internal failure while merging deals with custom fields.
///
/// Never escapes [`crate::Reconciler::get_combined_data`]; it is converted
/// into an empty table with an aggregate diagnostic.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("column '{0}' is missing")]
    MissingColumn(String),
    #[error("column '{0}' would appear twice")]
    DuplicateColumn(String),
    #[error("row has {actual} cells, table has {expected} columns")]
    RowWidth { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("CSV write error: {0}")]
    Csv(#[from] csv::Error),
    #[error("write error: {0}")]
    Write(#[from] std::io::Error),
}

impl CacheError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("malformed result: {0}")]
    Shape(#[from] ReconcileError),
}
