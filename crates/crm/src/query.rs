//! Query descriptors for the reporting endpoint.
//!
//! The endpoint accepts several incompatible filter dialects and which one a
//! deployment understands is not knowable in advance. Deal queries are
//! therefore built by an ordered list of [`Dialect`]s that the reconciler
//! tries in sequence until one returns data.

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::columns::CUSTOM_FIELDS;

// ── Constants ───────────────────────────────────────────────────────

pub const DEAL_TABLE: &str = "crm_deal";
pub const DEAL_CUSTOM_TABLE: &str = "crm_deal_uf";
pub const DEAL_FIELDS_TABLE: &str = "crm_deal_fields";
pub const USER_TABLE: &str = "user";
pub const CONTACT_TABLE: &str = "crm_contact";

pub const DEFAULT_CATEGORY_ID: i64 = 34;
pub const DEFAULT_PAGE_LIMIT: u32 = 1000;

/// Columns requested from the deal table.
pub const DEAL_FIELDS: [&str; 7] = [
    "ID",
    "DATE_CREATE",
    "DATE_MODIFY",
    "CLOSEDATE",
    "TITLE",
    "STAGE_NAME",
    "ASSIGNED_BY_NAME",
];

const TIME_FILTER_COLUMN: &str = "DATE_CREATE";

// ── QueryDescriptor ─────────────────────────────────────────────────

/// Opaque JSON body sent with a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct QueryDescriptor(Value);

impl QueryDescriptor {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// `{}`, the body used for table metadata reads.
    pub fn empty() -> Self {
        Self(Value::Object(Map::new()))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// `FILTER`/`SELECT` body used by the generic table reads.
    pub fn filter_select(filter: Map<String, Value>, select: Option<Vec<String>>) -> Self {
        let select = select.unwrap_or_else(|| vec!["*".to_string()]);
        Self(json!({
            "FILTER": filter,
            "SELECT": select,
        }))
    }
}

// ── Deal query ──────────────────────────────────────────────────────

/// Logical deal query shared by all dialects. Both dates are inclusive
/// bounds on the creation date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DealQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub category_id: i64,
    pub limit: u32,
    pub offset: u32,
}

impl DealQuery {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate, category_id: i64) -> Self {
        Self {
            start_date,
            end_date,
            category_id,
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }

    pub fn with_page(mut self, limit: u32, offset: u32) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    fn start(&self) -> String {
        self.start_date.format("%Y-%m-%d").to_string()
    }

    fn end(&self) -> String {
        self.end_date.format("%Y-%m-%d").to_string()
    }
}

// ── Dialects ────────────────────────────────────────────────────────

/// One request shape for a deal query.
#[derive(Debug, Clone, Copy)]
pub struct Dialect {
    pub name: &'static str,
    pub build: fn(&DealQuery) -> QueryDescriptor,
}

/// Known dialects in the order they are attempted.
pub const DEAL_DIALECTS: [Dialect; 3] = [
    Dialect {
        name: "dimensions_filter",
        build: dimensions_filter_query,
    },
    Dialect {
        name: "keyword_filter",
        build: keyword_filter_query,
    },
    Dialect {
        name: "triple_filter",
        build: triple_filter_query,
    },
];

fn include_filter(field: &str, values: Vec<Value>) -> Value {
    json!([[{
        "fieldName": field,
        "values": values,
        "type": "INCLUDE",
        "operator": "EQUALS",
    }]])
}

fn field_list(names: &[&str]) -> Value {
    Value::Array(names.iter().map(|n| json!({ "name": n })).collect())
}

/// Dimensions-filter dialect: date range plus an INCLUDE filter on the
/// category.
pub fn dimensions_filter_query(q: &DealQuery) -> QueryDescriptor {
    QueryDescriptor(json!({
        "dateRange": {
            "startDate": q.start(),
            "endDate": q.end(),
        },
        "configParams": {
            "timeFilterColumn": TIME_FILTER_COLUMN,
        },
        "dimensionsFilters": include_filter("CATEGORY_ID", vec![json!(q.category_id)]),
        "fields": field_list(&DEAL_FIELDS),
        "limit": q.limit,
        "offset": q.offset,
    }))
}

/// Keyword dialect: `filter` keys carry their comparison operator as a prefix.
pub fn keyword_filter_query(q: &DealQuery) -> QueryDescriptor {
    QueryDescriptor(json!({
        "filter": {
            ">=DATE_CREATE": q.start(),
            "<=DATE_CREATE": q.end(),
            "CATEGORY_ID": q.category_id,
        },
        "select": DEAL_FIELDS,
        "limit": q.limit,
        "start": q.offset,
    }))
}

/// Positional dialect: `filter` is a list of `[field, op, value]` /
/// `[op-prefixed field, value]` arrays.
pub fn triple_filter_query(q: &DealQuery) -> QueryDescriptor {
    QueryDescriptor(json!({
        "select": DEAL_FIELDS,
        "filter": [
            ["CATEGORY_ID", "=", q.category_id],
            [">=DATE_CREATE", q.start()],
            ["<=DATE_CREATE", q.end()],
        ],
        "limit": q.limit,
        "offset": q.offset,
    }))
}

/// Custom-field query restricted to one chunk of deal identifiers.
pub fn custom_fields_query(deal_ids: &[Value]) -> QueryDescriptor {
    let mut fields = vec!["DEAL_ID"];
    fields.extend(CUSTOM_FIELDS.iter().map(|f| f.code));

    QueryDescriptor(json!({
        "dimensionsFilters": include_filter("DEAL_ID", deal_ids.to_vec()),
        "fields": field_list(&fields),
        "limit": DEFAULT_PAGE_LIMIT,
        "offset": 0,
    }))
}
