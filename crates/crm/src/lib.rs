//! `dealboard-crm`: CRM deal retrieval and reconciliation pipeline.
//!
//! The [`client::CrmClient`] issues one request per call against the CRM
//! reporting endpoint. The [`reconcile::Reconciler`] composes those calls
//! (dialect fallback, custom-field batching) and merges deals with their
//! custom fields into one display-ready [`table::Table`].
//!
//! No public reconciliation operation returns an error: every failure
//! degrades into an empty or partial table plus [`outcome::Diagnostic`]s.

pub mod cache;
pub mod client;
pub mod columns;
pub mod error;
pub mod export;
pub mod integration;
pub mod outcome;
pub mod process;
pub mod query;
pub mod raw;
pub mod reconcile;
pub mod store;
pub mod table;

pub use client::{Connection, CrmClient, Fetcher};
pub use error::{CacheError, FetchError, ReconcileError, StoreError};
pub use outcome::{Diagnostic, DiagnosticKind, Outcome, OutcomeStatus};
pub use query::{DealQuery, QueryDescriptor};
pub use raw::RawResponse;
pub use reconcile::Reconciler;
pub use table::{Cell, Table};
