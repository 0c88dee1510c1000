use serde::Serialize;

use crate::table::Table;

/// Failure taxonomy surfaced through [`Outcome::diagnostics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Timeout, connection refused, other network-layer failure.
    Transport,
    /// Non-200 status, malformed JSON, in-band `error` field.
    Protocol,
    /// An expected identifier column was absent under every known name.
    Schema,
    /// Unexpected failure while combining tables.
    Aggregate,
    /// The request succeeded but returned nothing.
    NoData,
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport => write!(f, "transport"),
            Self::Protocol => write!(f, "protocol"),
            Self::Schema => write!(f, "schema"),
            Self::Aggregate => write!(f, "aggregate"),
            Self::NoData => write!(f, "no_data"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Pipeline step that produced it (`deals`, `custom_fields`, `combine`).
    pub stage: &'static str,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(stage: &'static str, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Every requested piece was retrieved.
    Complete,
    /// Rows are present but some piece (a chunk, the custom fields) is missing.
    Partial,
    /// No rows.
    Empty,
}

/// Result of every public reconciliation operation: always a table, never
/// an error. Callers that need to tell "no data" from "retrieval failed"
/// inspect `diagnostics`.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub table: Table,
    pub status: OutcomeStatus,
    pub diagnostics: Vec<Diagnostic>,
}

impl Outcome {
    /// `Complete`, downgraded to `Empty` when the table has no rows.
    pub fn complete(table: Table, diagnostics: Vec<Diagnostic>) -> Self {
        Self::with_status(table, OutcomeStatus::Complete, diagnostics)
    }

    /// `Partial`, downgraded to `Empty` when the table has no rows.
    pub fn partial(table: Table, diagnostics: Vec<Diagnostic>) -> Self {
        Self::with_status(table, OutcomeStatus::Partial, diagnostics)
    }

    pub fn empty(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            table: Table::empty(),
            status: OutcomeStatus::Empty,
            diagnostics,
        }
    }

    pub fn with_status(table: Table, status: OutcomeStatus, diagnostics: Vec<Diagnostic>) -> Self {
        let status = if table.is_empty() {
            OutcomeStatus::Empty
        } else {
            status
        };
        Self {
            table,
            status,
            diagnostics,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn has_kind(&self, kind: DiagnosticKind) -> bool {
        self.diagnostics.iter().any(|d| d.kind == kind)
    }
}
