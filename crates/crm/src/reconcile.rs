//! Reconciliation of deals with their custom fields.
//!
//! [`Reconciler`] drives a [`Fetcher`] through the dialect fallback chain
//! for the deal table, batches custom-field lookups by deal ID, and merges
//! both into one display table. Every public operation returns an
//! [`Outcome`]; nothing here returns `Err` to the caller.

use chrono::NaiveDate;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::client::Fetcher;
use crate::columns::{
    custom_code_renames, display_renames, ResolvedColumn, COLLISION_SUFFIX, CUSTOM_DEAL_ID,
    CUSTOM_FIELDS, DATE_COLUMNS, DEAL_ID, DISPLAY_CREATED, DISPLAY_MODIFIED, ESSENTIAL_COLUMNS,
};
use crate::error::ReconcileError;
use crate::outcome::{Diagnostic, DiagnosticKind, Outcome, OutcomeStatus};
use crate::query::{
    custom_fields_query, DealQuery, Dialect, DEAL_CUSTOM_TABLE, DEAL_DIALECTS, DEAL_TABLE,
};
use crate::raw::RawResponse;
use crate::table::{Cell, Table};

pub const DEFAULT_CHUNK_SIZE: usize = 100;

/// Output date pattern for `Criado` / `Modificado`.
pub const DISPLAY_DATE_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

const STAGE_DEALS: &str = "deals";
const STAGE_CUSTOM: &str = "custom_fields";
const STAGE_COMBINE: &str = "combine";

/// Deal columns kept in the combined output, in order.
const PROJECTED_DEAL_COLUMNS: [&str; 6] = [
    "ID",
    "DATE_CREATE",
    "DATE_MODIFY",
    "ASSIGNED_BY_NAME",
    "STAGE_NAME",
    "TITLE",
];

pub struct Reconciler<F> {
    fetcher: F,
    dialects: Vec<Dialect>,
    chunk_size: usize,
    default_category_id: i64,
}

impl<F: Fetcher> Reconciler<F> {
    pub fn new(fetcher: F, default_category_id: i64) -> Self {
        Self {
            fetcher,
            dialects: DEAL_DIALECTS.to_vec(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            default_category_id,
        }
    }

    /// Replace the dialect chain. Order is the attempt order.
    pub fn with_dialects(mut self, dialects: Vec<Dialect>) -> Self {
        self.dialects = dialects;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn default_category_id(&self) -> i64 {
        self.default_category_id
    }

    // ── Deals ───────────────────────────────────────────────────────

    /// Fetch the deal table, trying each dialect in order until one returns
    /// a non-empty response. Exhausting the chain yields an empty outcome.
    pub fn get_crm_deals(&self, query: &DealQuery) -> Outcome {
        info!(
            start = %query.start_date,
            end = %query.end_date,
            category_id = query.category_id,
            "fetching deals"
        );

        let mut diagnostics = Vec::new();
        for dialect in &self.dialects {
            let descriptor = (dialect.build)(query);
            match self.fetcher.fetch(DEAL_TABLE, &descriptor) {
                Ok(raw) if !raw.is_empty() => {
                    info!(dialect = dialect.name, "deal query accepted");
                    return records_outcome(raw, STAGE_DEALS, diagnostics);
                }
                Ok(_) => {
                    warn!(dialect = dialect.name, "deal query returned no data");
                    diagnostics.push(Diagnostic::new(
                        STAGE_DEALS,
                        DiagnosticKind::NoData,
                        format!("dialect {} returned an empty response", dialect.name),
                    ));
                }
                Err(e) => {
                    warn!(dialect = dialect.name, error = %e, "deal query failed");
                    diagnostics.push(Diagnostic::new(
                        STAGE_DEALS,
                        e.kind(),
                        format!("dialect {}: {}", dialect.name, e),
                    ));
                }
            }
        }

        warn!(
            attempts = self.dialects.len(),
            "no deal data after trying every dialect"
        );
        Outcome::empty(diagnostics)
    }

    // ── Custom fields ───────────────────────────────────────────────

    /// Fetch custom fields for `deal_ids` in chunks. A failed chunk is
    /// recorded and skipped; the rest still run.
    pub fn get_crm_deal_uf(&self, deal_ids: &[Cell]) -> Outcome {
        let ids: Vec<Value> = deal_ids
            .iter()
            .filter(|c| !c.is_null())
            .map(Cell::to_json)
            .collect();
        if ids.is_empty() {
            warn!("no deal IDs given for custom field lookup");
            return Outcome::empty(vec![Diagnostic::new(
                STAGE_CUSTOM,
                DiagnosticKind::NoData,
                "no deal IDs to look up",
            )]);
        }

        let total_chunks = ids.len().div_ceil(self.chunk_size);
        let mut records = Vec::new();
        let mut diagnostics = Vec::new();
        let mut failed_chunks = 0usize;

        for (i, chunk) in ids.chunks(self.chunk_size).enumerate() {
            let chunk_no = i + 1;
            debug!(chunk = chunk_no, of = total_chunks, ids = chunk.len(), "custom field chunk");
            match self.fetcher.fetch(DEAL_CUSTOM_TABLE, &custom_fields_query(chunk)) {
                Ok(raw) if !raw.is_empty() => {
                    let chunk_records = raw.into_records();
                    info!(chunk = chunk_no, records = chunk_records.len(), "custom fields received");
                    records.extend(chunk_records);
                }
                Ok(_) => {
                    warn!(chunk = chunk_no, "no custom fields for chunk");
                    diagnostics.push(Diagnostic::new(
                        STAGE_CUSTOM,
                        DiagnosticKind::NoData,
                        format!("chunk {} of {} returned no data", chunk_no, total_chunks),
                    ));
                }
                Err(e) => {
                    error!(chunk = chunk_no, error = %e, "custom field chunk failed");
                    failed_chunks += 1;
                    diagnostics.push(Diagnostic::new(
                        STAGE_CUSTOM,
                        e.kind(),
                        format!("chunk {} of {}: {}", chunk_no, total_chunks, e),
                    ));
                }
            }
        }

        if records.is_empty() {
            warn!(chunks = total_chunks, "no custom fields for any deal");
            return Outcome::empty(diagnostics);
        }

        let table = Table::from_records(&records);
        let status = if failed_chunks > 0 {
            OutcomeStatus::Partial
        } else {
            OutcomeStatus::Complete
        };
        Outcome::with_status(table, status, diagnostics)
    }

    // ── Combination ─────────────────────────────────────────────────

    /// Deals in `[start, end]` left-joined with their custom fields, renamed
    /// and projected for display. `category_id` falls back to the default.
    pub fn get_combined_data(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        category_id: Option<i64>,
    ) -> Outcome {
        let category_id = category_id.unwrap_or(self.default_category_id);
        let query = DealQuery::new(start, end, category_id);
        let mut diagnostics = Vec::new();

        match self.combine(&query, &mut diagnostics) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "combining deals with custom fields failed");
                diagnostics.push(Diagnostic::new(
                    STAGE_COMBINE,
                    DiagnosticKind::Aggregate,
                    e.to_string(),
                ));
                Outcome::empty(diagnostics)
            }
        }
    }

    fn combine(
        &self,
        query: &DealQuery,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Outcome, ReconcileError> {
        let deals = self.get_crm_deals(query);
        diagnostics.extend(deals.diagnostics);
        let mut deals = deals.table;
        if deals.is_empty() {
            warn!("no deals found");
            return Ok(Outcome::empty(std::mem::take(diagnostics)));
        }

        let Some(id_column) = DEAL_ID.resolve(&deals) else {
            error!(columns = ?deals.columns(), "deal table has no ID column");
            diagnostics.push(Diagnostic::new(
                STAGE_COMBINE,
                DiagnosticKind::Schema,
                format!("deal table has no ID column (columns: {:?})", deals.columns()),
            ));
            return Ok(Outcome::empty(std::mem::take(diagnostics)));
        };
        id_column.apply(&mut deals);

        let ids: Vec<Cell> = deals
            .column_values(DEAL_ID.canonical)
            .ok_or_else(|| ReconcileError::MissingColumn(DEAL_ID.canonical.to_string()))?
            .into_iter()
            .cloned()
            .collect();
        info!(deals = ids.len(), "fetching custom fields for deals");

        let custom = self.get_crm_deal_uf(&ids);
        let custom_status = custom.status;
        diagnostics.extend(custom.diagnostics);
        let mut custom = custom.table;

        if custom.is_empty() {
            warn!("no custom fields; returning deals alone");
            return Ok(Outcome::partial(
                deals_only(deals),
                std::mem::take(diagnostics),
            ));
        }

        let Some(fk_column) = CUSTOM_DEAL_ID.resolve(&custom) else {
            error!(columns = ?custom.columns(), "custom field table has no deal ID column");
            diagnostics.push(Diagnostic::new(
                STAGE_COMBINE,
                DiagnosticKind::Schema,
                format!(
                    "custom field table has no deal ID column (columns: {:?})",
                    custom.columns()
                ),
            ));
            return Ok(Outcome::partial(
                deals_only(deals),
                std::mem::take(diagnostics),
            ));
        };
        fk_column.apply(&mut custom);

        let mut merged = merge(deals, custom, &fk_column)?;

        for column in DATE_COLUMNS {
            merged.parse_datetime_column(column);
        }

        let table = finish(merged);
        let status = if custom_status == OutcomeStatus::Partial {
            OutcomeStatus::Partial
        } else {
            OutcomeStatus::Complete
        };
        info!(rows = table.len(), status = ?status, "combined data ready");
        Ok(Outcome::with_status(table, status, std::mem::take(diagnostics)))
    }
}

/// Normalize a response into a table outcome for `stage`.
fn records_outcome(raw: RawResponse, stage: &'static str, mut diagnostics: Vec<Diagnostic>) -> Outcome {
    let records = raw.into_records();
    if records.is_empty() {
        diagnostics.push(Diagnostic::new(
            stage,
            DiagnosticKind::NoData,
            "response contained no records",
        ));
        return Outcome::empty(diagnostics);
    }
    info!(stage, records = records.len(), "records normalized");
    Outcome::complete(Table::from_records(&records), diagnostics)
}

fn apply_display_names(table: &mut Table) {
    let renames = display_renames();
    let pairs: Vec<(&str, &str)> = renames.iter().map(|(from, to)| (from.as_str(), *to)).collect();
    table.rename_columns(&pairs);
}

fn backfill_custom_columns(table: &mut Table) {
    for field in &CUSTOM_FIELDS {
        if table.has_column(field.display) {
            table.map_column(field.display, |c| {
                if c.is_null() {
                    Cell::text("")
                } else {
                    c.clone()
                }
            });
        } else {
            table.add_column(field.display, Cell::text(""));
        }
    }
}

/// Degraded output: deals with display names and empty custom columns.
fn deals_only(mut deals: Table) -> Table {
    apply_display_names(&mut deals);
    for field in &CUSTOM_FIELDS {
        deals.add_column(field.display, Cell::text(""));
    }
    deals
}

fn merge(
    mut deals: Table,
    mut custom: Table,
    fk_column: &ResolvedColumn,
) -> Result<Table, ReconcileError> {
    let renames = custom_code_renames();
    custom.rename_columns(&renames);

    deals.stringify_column(DEAL_ID.canonical);
    custom.stringify_column(fk_column.canonical);

    let merged = deals.left_join(
        &custom,
        DEAL_ID.canonical,
        fk_column.canonical,
        COLLISION_SUFFIX,
    )?;
    info!(rows = merged.len(), "merged deals with custom fields");
    Ok(merged)
}

/// Project, rename and format the merged table for display.
fn finish(merged: Table) -> Table {
    let mut wanted: Vec<String> = PROJECTED_DEAL_COLUMNS.iter().map(|c| c.to_string()).collect();
    for field in &CUSTOM_FIELDS {
        let suffixed = format!("{}{}", field.logical, COLLISION_SUFFIX);
        if merged.has_column(field.logical) {
            wanted.push(field.logical.to_string());
        } else if merged.has_column(&suffixed) {
            wanted.push(suffixed);
        } else {
            warn!(column = field.logical, "optional custom column missing");
        }
    }

    let wanted: Vec<&str> = wanted.iter().map(String::as_str).collect();
    let mut table = merged.select(&wanted);
    if table.columns().is_empty() {
        error!("none of the output columns exist; returning the merged table");
        return merged;
    }

    apply_display_names(&mut table);

    for column in [DISPLAY_CREATED, DISPLAY_MODIFIED] {
        table.format_datetime_column(column, DISPLAY_DATE_FORMAT);
    }

    for column in ESSENTIAL_COLUMNS {
        if !table.has_column(column) {
            table.add_column(column, Cell::text(""));
        }
    }
    backfill_custom_columns(&mut table);
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use serde_json::json;

    use crate::error::FetchError;
    use crate::query::QueryDescriptor;

    type Responder = Box<dyn Fn(&str, &QueryDescriptor, usize) -> Result<RawResponse, FetchError>>;

    /// Answers from a closure and records every call.
    struct Scripted {
        calls: RefCell<Vec<(String, Value)>>,
        respond: Responder,
    }

    impl Scripted {
        fn new(
            respond: impl Fn(&str, &QueryDescriptor, usize) -> Result<RawResponse, FetchError> + 'static,
        ) -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                respond: Box::new(respond),
            }
        }

        fn calls_to(&self, table: &str) -> Vec<Value> {
            self.calls
                .borrow()
                .iter()
                .filter(|(t, _)| t == table)
                .map(|(_, q)| q.clone())
                .collect()
        }
    }

    impl Fetcher for Scripted {
        fn fetch(&self, table: &str, query: &QueryDescriptor) -> Result<RawResponse, FetchError> {
            let n = self.calls.borrow().len();
            self.calls
                .borrow_mut()
                .push((table.to_string(), query.as_value().clone()));
            (self.respond)(table, query, n)
        }
    }

    fn protocol_error(table: &str) -> FetchError {
        FetchError::Status {
            table: table.to_string(),
            status: 500,
            body: String::new(),
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn query() -> DealQuery {
        DealQuery::new(date(2025, 1, 1), date(2025, 1, 31), 34)
    }

    fn is_triple(q: &QueryDescriptor) -> bool {
        q.as_value()["filter"].is_array()
    }

    fn chunk_ids(q: &Value) -> Vec<Value> {
        q["dimensionsFilters"][0][0]["values"]
            .as_array()
            .cloned()
            .unwrap_or_default()
    }

    #[test]
    fn test_dialects_tried_in_order_until_success() {
        let fetcher = Scripted::new(|table, q, _| {
            if is_triple(q) {
                Ok(RawResponse::new(json!([["ID", "TITLE"], ["1", "a"], ["2", "b"]])))
            } else {
                Err(protocol_error(table))
            }
        });
        let reconciler = Reconciler::new(&fetcher, 34);

        let outcome = reconciler.get_crm_deals(&query());
        assert_eq!(outcome.status, OutcomeStatus::Complete);
        assert_eq!(outcome.table.len(), 2);
        assert_eq!(outcome.table.get(1, "TITLE"), Some(&Cell::text("b")));

        let calls = fetcher.calls_to(DEAL_TABLE);
        assert_eq!(calls.len(), 3);
        assert!(calls[0].get("dimensionsFilters").is_some());
        assert!(calls[1]["filter"].is_object());
        assert!(calls[2]["filter"].is_array());
        // Failures of the earlier dialects are still reported.
        assert_eq!(outcome.diagnostics.len(), 2);
    }

    #[test]
    fn test_empty_response_falls_through_to_next_dialect() {
        let fetcher = Scripted::new(|_, _, n| match n {
            0 => Ok(RawResponse::new(json!([]))),
            _ => Ok(RawResponse::new(json!([{"ID": "9"}]))),
        });
        let outcome = Reconciler::new(&fetcher, 34).get_crm_deals(&query());
        assert_eq!(outcome.table.len(), 1);
        assert_eq!(fetcher.calls_to(DEAL_TABLE).len(), 2);
        assert!(outcome.has_kind(DiagnosticKind::NoData));
    }

    #[test]
    fn test_all_dialects_fail_gives_empty_table() {
        let fetcher = Scripted::new(|table, _, _| Err(protocol_error(table)));
        let outcome = Reconciler::new(&fetcher, 34).get_crm_deals(&query());
        assert!(outcome.is_empty());
        assert_eq!(outcome.status, OutcomeStatus::Empty);
        assert_eq!(outcome.diagnostics.len(), 3);
        assert!(outcome.has_kind(DiagnosticKind::Protocol));
    }

    #[test]
    fn test_custom_field_ids_chunked_by_100() {
        let fetcher = Scripted::new(|_, _, _| Ok(RawResponse::new(json!([]))));
        let ids: Vec<Cell> = (1..=250).map(|i| Cell::text(i.to_string())).collect();

        let outcome = Reconciler::new(&fetcher, 34).get_crm_deal_uf(&ids);
        assert!(outcome.is_empty());

        let calls = fetcher.calls_to(DEAL_CUSTOM_TABLE);
        let sizes: Vec<usize> = calls.iter().map(|q| chunk_ids(q).len()).collect();
        assert_eq!(sizes, [100, 100, 50]);
        assert_eq!(chunk_ids(&calls[2])[0], json!("201"));
    }

    #[test]
    fn test_failed_chunk_is_skipped() {
        let fetcher = Scripted::new(|table, q, _| {
            let ids = chunk_ids(q.as_value());
            if ids[0] == json!("1") {
                Err(protocol_error(table))
            } else {
                Ok(RawResponse::new(json!([
                    ["DEAL_ID", "UF_CRM_1737689240946"],
                    ["101", "meeting"]
                ])))
            }
        });
        let ids: Vec<Cell> = (1..=150).map(|i| Cell::text(i.to_string())).collect();

        let outcome = Reconciler::new(&fetcher, 34).get_crm_deal_uf(&ids);
        assert_eq!(outcome.status, OutcomeStatus::Partial);
        assert_eq!(outcome.table.len(), 1);
        assert_eq!(outcome.table.get(0, "DEAL_ID"), Some(&Cell::text("101")));
        assert_eq!(fetcher.calls_to(DEAL_CUSTOM_TABLE).len(), 2);
    }

    #[test]
    fn test_no_ids_issues_no_requests() {
        let fetcher = Scripted::new(|_, _, _| Ok(RawResponse::new(json!([{"DEAL_ID": "1"}]))));
        let outcome = Reconciler::new(&fetcher, 34).get_crm_deal_uf(&[]);
        assert!(outcome.is_empty());
        assert!(fetcher.calls.borrow().is_empty());
    }

    fn deals_then_custom(
        deals: Value,
        custom: Value,
    ) -> impl Fn(&str, &QueryDescriptor, usize) -> Result<RawResponse, FetchError> {
        move |table, _, _| {
            if table == DEAL_TABLE {
                Ok(RawResponse::new(deals.clone()))
            } else {
                Ok(RawResponse::new(custom.clone()))
            }
        }
    }

    #[test]
    fn test_combined_end_to_end() {
        let fetcher = Scripted::new(deals_then_custom(
            json!([
                {"ID": "10", "DATE_CREATE": "2025-01-05T10:00:00+03:00", "DATE_MODIFY": "2025-01-06 11:30:00",
                 "ASSIGNED_BY_NAME": "Ana", "STAGE_NAME": "ASSINADO", "TITLE": "Família Silva"},
                {"ID": "11", "DATE_CREATE": "2025-01-07T09:15:00+03:00", "DATE_MODIFY": "",
                 "ASSIGNED_BY_NAME": "Bruno", "STAGE_NAME": "ORÇAMENTO", "TITLE": "Família Souza"}
            ]),
            json!([
                ["DEAL_ID", "UF_CRM_1722605592778", "UF_CRM_1737689240946", "UF_CRM_1740458137391"],
                ["10", "https://tree.example/10", "15/01/2025, de 14:00 até 15:00: REUNIÃO, Carla", "2025-01-20"]
            ]),
        ));

        let outcome =
            Reconciler::new(&fetcher, 34).get_combined_data(date(2025, 1, 1), date(2025, 1, 31), None);
        assert_eq!(outcome.status, OutcomeStatus::Complete);

        let t = &outcome.table;
        assert_eq!(
            t.columns(),
            &[
                "ID",
                "Criado",
                "Modificado",
                "Responsável",
                "Fase",
                "TÍTULO",
                "LINK ARVORE DA FAMÍLIA PLATAFORMA",
                "REUNIÃO",
                "FECHADO"
            ]
        );
        assert_eq!(t.len(), 2);
        assert_eq!(t.get(0, "ID"), Some(&Cell::text("10")));
        assert_eq!(t.get(0, "Criado"), Some(&Cell::text("05/01/2025 10:00:00")));
        assert_eq!(t.get(0, "Modificado"), Some(&Cell::text("06/01/2025 11:30:00")));
        assert_eq!(
            t.get(0, "LINK ARVORE DA FAMÍLIA PLATAFORMA"),
            Some(&Cell::text("https://tree.example/10"))
        );
        assert_eq!(t.get(0, "FECHADO"), Some(&Cell::text("2025-01-20")));

        assert_eq!(t.get(1, "ID"), Some(&Cell::text("11")));
        assert_eq!(t.get(1, "Modificado"), Some(&Cell::Null));
        assert_eq!(t.get(1, "REUNIÃO"), Some(&Cell::text("")));
        assert_eq!(t.get(1, "FECHADO"), Some(&Cell::text("")));

        // One custom-field request carrying both IDs.
        let calls = fetcher.calls_to(DEAL_CUSTOM_TABLE);
        assert_eq!(calls.len(), 1);
        assert_eq!(chunk_ids(&calls[0]), vec![json!("10"), json!("11")]);
    }

    #[test]
    fn test_combined_keeps_unmatched_deal() {
        let fetcher = Scripted::new(deals_then_custom(
            json!([{"ID": "5", "STAGE_NAME": "NOVO"}]),
            json!([{"DEAL_ID": "6", "UF_CRM_1737689240946": "x"}]),
        ));
        let outcome =
            Reconciler::new(&fetcher, 34).get_combined_data(date(2025, 1, 1), date(2025, 1, 31), None);
        assert_eq!(outcome.table.len(), 1);
        assert_eq!(outcome.table.get(0, "ID"), Some(&Cell::text("5")));
        assert_eq!(outcome.table.get(0, "REUNIÃO"), Some(&Cell::text("")));
        assert_eq!(outcome.table.get(0, "Responsável"), Some(&Cell::text("")));
    }

    #[test]
    fn test_combined_numeric_ids_join_with_string_keys() {
        let fetcher = Scripted::new(deals_then_custom(
            json!([{"ID": 7, "STAGE_NAME": "NOVO"}]),
            json!([{"DEAL_ID": "7", "UF_CRM_1740458137391": "2025-02-01"}]),
        ));
        let outcome =
            Reconciler::new(&fetcher, 34).get_combined_data(date(2025, 1, 1), date(2025, 1, 31), None);
        assert_eq!(outcome.table.get(0, "ID"), Some(&Cell::text("7")));
        assert_eq!(outcome.table.get(0, "FECHADO"), Some(&Cell::text("2025-02-01")));
    }

    #[test]
    fn test_combined_foreign_key_fallback() {
        let fetcher = Scripted::new(deals_then_custom(
            json!([{"ID": "1", "STAGE_NAME": "NOVO"}]),
            json!([{"deal_id": "1", "UF_CRM_1722605592778": "https://tree.example/1"}]),
        ));
        let outcome =
            Reconciler::new(&fetcher, 34).get_combined_data(date(2025, 1, 1), date(2025, 1, 31), None);
        assert_eq!(outcome.status, OutcomeStatus::Complete);
        assert_eq!(
            outcome.table.get(0, "LINK ARVORE DA FAMÍLIA PLATAFORMA"),
            Some(&Cell::text("https://tree.example/1"))
        );
    }

    #[test]
    fn test_combined_lowercase_deal_id_is_renamed() {
        let fetcher = Scripted::new(deals_then_custom(
            json!([{"id": "3", "STAGE_NAME": "NOVO"}]),
            json!([{"DEAL_ID": "3", "UF_CRM_1737689240946": "r"}]),
        ));
        let outcome =
            Reconciler::new(&fetcher, 34).get_combined_data(date(2025, 1, 1), date(2025, 1, 31), None);
        assert_eq!(outcome.table.get(0, "ID"), Some(&Cell::text("3")));
        assert_eq!(outcome.table.get(0, "REUNIÃO"), Some(&Cell::text("r")));
    }

    #[test]
    fn test_combined_without_id_column_is_empty() {
        let fetcher = Scripted::new(deals_then_custom(
            json!([{"TITLE": "no id"}]),
            json!([]),
        ));
        let outcome =
            Reconciler::new(&fetcher, 34).get_combined_data(date(2025, 1, 1), date(2025, 1, 31), None);
        assert!(outcome.is_empty());
        assert!(outcome.has_kind(DiagnosticKind::Schema));
        assert!(fetcher.calls_to(DEAL_CUSTOM_TABLE).is_empty());
    }

    #[test]
    fn test_combined_without_custom_fields_returns_deals() {
        let fetcher = Scripted::new(deals_then_custom(
            json!([
                {"ID": "1", "STAGE_NAME": "NOVO", "ASSIGNED_BY_NAME": "Ana"},
                {"ID": "2", "STAGE_NAME": "ASSINADO", "ASSIGNED_BY_NAME": "Bia"}
            ]),
            json!([]),
        ));
        let outcome =
            Reconciler::new(&fetcher, 34).get_combined_data(date(2025, 1, 1), date(2025, 1, 31), None);
        assert_eq!(outcome.status, OutcomeStatus::Partial);
        let t = &outcome.table;
        assert_eq!(t.len(), 2);
        assert_eq!(t.get(1, "Fase"), Some(&Cell::text("ASSINADO")));
        for field in &CUSTOM_FIELDS {
            assert_eq!(t.get(0, field.display), Some(&Cell::text("")));
            assert_eq!(t.get(1, field.display), Some(&Cell::text("")));
        }
    }

    #[test]
    fn test_combined_unresolvable_foreign_key_returns_deals() {
        let fetcher = Scripted::new(deals_then_custom(
            json!([{"ID": "1", "TITLE": "t"}]),
            json!([{"SOMETHING": "1"}]),
        ));
        let outcome =
            Reconciler::new(&fetcher, 34).get_combined_data(date(2025, 1, 1), date(2025, 1, 31), None);
        assert_eq!(outcome.status, OutcomeStatus::Partial);
        assert!(outcome.has_kind(DiagnosticKind::Schema));
        assert_eq!(outcome.table.get(0, "TÍTULO"), Some(&Cell::text("t")));
        assert_eq!(outcome.table.get(0, "FECHADO"), Some(&Cell::text("")));
    }

    #[test]
    fn test_combined_collision_suffix_renamed_to_display() {
        // A custom record echoing a deal column name lands under the suffix.
        let fetcher = Scripted::new(deals_then_custom(
            json!([{"ID": "1", "REUNIAO": "deal-side", "STAGE_NAME": "NOVO"}]),
            json!([{"DEAL_ID": "1", "UF_CRM_1737689240946": "custom-side"}]),
        ));
        let outcome =
            Reconciler::new(&fetcher, 34).get_combined_data(date(2025, 1, 1), date(2025, 1, 31), None);
        // The unsuffixed column wins the projection.
        assert_eq!(outcome.table.get(0, "REUNIÃO"), Some(&Cell::text("deal-side")));
    }

    #[test]
    fn test_combined_merge_failure_becomes_aggregate_empty() {
        // The suffixed custom column would clash with an existing deal column.
        let fetcher = Scripted::new(deals_then_custom(
            json!([{"ID": "1", "TITLE": "t", "TITLE_uf": "already here", "STAGE_NAME": "NOVO"}]),
            json!([{"DEAL_ID": "1", "TITLE": "custom title"}]),
        ));
        let outcome =
            Reconciler::new(&fetcher, 34).get_combined_data(date(2025, 1, 1), date(2025, 1, 31), None);
        assert!(outcome.is_empty());
        assert_eq!(outcome.status, OutcomeStatus::Empty);
        assert!(outcome.table.columns().is_empty());
        assert!(outcome.has_kind(DiagnosticKind::Aggregate));
        let aggregate = outcome
            .diagnostics
            .iter()
            .find(|d| d.kind == DiagnosticKind::Aggregate)
            .unwrap();
        assert!(aggregate.message.contains("TITLE_uf"));
    }

    #[test]
    fn test_combined_uses_default_category() {
        let fetcher = Scripted::new(|_, _, _| Ok(RawResponse::new(json!([]))));
        Reconciler::new(&fetcher, 32).get_combined_data(date(2025, 1, 1), date(2025, 1, 31), None);
        let calls = fetcher.calls_to(DEAL_TABLE);
        assert_eq!(calls[0]["dimensionsFilters"][0][0]["values"], json!([32]));

        Reconciler::new(&fetcher, 32).get_combined_data(date(2025, 1, 1), date(2025, 1, 31), Some(7));
        let calls = fetcher.calls_to(DEAL_TABLE);
        assert_eq!(calls[3]["dimensionsFilters"][0][0]["values"], json!([7]));
    }

    #[test]
    fn test_combined_is_idempotent() {
        let fetcher = Scripted::new(deals_then_custom(
            json!([{"ID": "10", "DATE_CREATE": "2025-01-05 10:00:00", "STAGE_NAME": "NOVO"},
                   {"ID": "11", "DATE_CREATE": "2025-01-06 10:00:00", "STAGE_NAME": "NOVO"}]),
            json!([{"DEAL_ID": "10", "UF_CRM_1737689240946": "x"}]),
        ));
        let reconciler = Reconciler::new(&fetcher, 34);
        let first = reconciler.get_combined_data(date(2025, 1, 1), date(2025, 1, 31), None);
        let second = reconciler.get_combined_data(date(2025, 1, 1), date(2025, 1, 31), None);
        assert_eq!(first.table, second.table);
        assert_eq!(first.status, second.status);
    }

    #[test]
    fn test_custom_dialect_chain() {
        let fetcher = Scripted::new(|_, _, _| Ok(RawResponse::new(json!([{"ID": "1"}]))));
        let reconciler = Reconciler::new(&fetcher, 34).with_dialects(vec![DEAL_DIALECTS[2]]);
        reconciler.get_crm_deals(&query());
        let calls = fetcher.calls_to(DEAL_TABLE);
        assert_eq!(calls.len(), 1);
        assert!(calls[0]["filter"].is_array());
    }
}
