//! Dynamically typed tables built from CRM records.
//!
//! A [`Table`] is an ordered list of column names plus rows of [`Cell`]s.
//! Every row has exactly one cell per column. Column order follows the order
//! in which names were first seen, so two runs over the same records build
//! identical tables.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ReconcileError;

// ── Cell ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Cell {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl Cell {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map(Self::Float).unwrap_or(Self::Null),
            },
            Value::String(s) => Self::Text(s.clone()),
            // Nested structures are kept as their compact JSON text.
            other => Self::Text(other.to_string()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Text(s) => Value::String(s.clone()),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Bool(b) => Value::Bool(*b),
            Self::DateTime(dt) => Value::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            Self::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Null, or text that is empty after trimming.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// String form used for join keys. `Null` has no key and never matches.
    pub fn to_key(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Text(s) => Some(s.clone()),
            Self::Int(i) => Some(i.to_string()),
            Self::Float(f) => Some(format_float(*f)),
            Self::Bool(true) => Some("True".to_string()),
            Self::Bool(false) => Some("False".to_string()),
            Self::DateTime(dt) => Some(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }

    /// Text shown in terminal tables and CSV exports. `Null` renders empty.
    pub fn to_display(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(true) => "true".to_string(),
            Self::Bool(false) => "false".to_string(),
            other => other.to_key().unwrap_or_default(),
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for Cell {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

// ── Date parsing ────────────────────────────────────────────────────

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y"];

/// Parse the date/time spellings the CRM emits. Returns `None` for anything
/// unrecognised; callers store that as `Cell::Null`.
///
/// RFC 3339 values keep the wall-clock time of their own offset.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0);
        }
    }
    None
}

// ── Table ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a table from record mappings. Columns appear in first-seen
    /// order across all records; keys a record lacks become `Null`.
    pub fn from_records(records: &[Map<String, Value>]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for record in records {
            for key in record.keys() {
                if !index.contains_key(key) {
                    index.insert(key.clone(), columns.len());
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|c| record.get(c).map(Cell::from_json).unwrap_or(Cell::Null))
                    .collect()
            })
            .collect();

        Self { columns, rows }
    }

    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<(), ReconcileError> {
        if row.len() != self.columns.len() {
            return Err(ReconcileError::RowWidth {
                expected: self.columns.len(),
                actual: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no rows or no columns.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.columns.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    pub fn column_values(&self, name: &str) -> Option<Vec<&Cell>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    /// Rename a single column. Returns false when `from` does not exist.
    pub fn rename_column(&mut self, from: &str, to: &str) -> bool {
        match self.column_index(from) {
            Some(idx) => {
                self.columns[idx] = to.to_string();
                true
            }
            None => false,
        }
    }

    /// Apply every `(from, to)` pair whose `from` column exists.
    /// Pairs are resolved against the names present before renaming.
    pub fn rename_columns(&mut self, mapping: &[(&str, &str)]) {
        let renamed: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                mapping
                    .iter()
                    .find(|(from, _)| from == c)
                    .map(|(_, to)| to.to_string())
                    .unwrap_or_else(|| c.clone())
            })
            .collect();
        self.columns = renamed;
    }

    /// Project onto the named columns that exist, in the order given.
    pub fn select(&self, names: &[&str]) -> Table {
        let picked: Vec<(usize, String)> = names
            .iter()
            .filter_map(|n| self.column_index(n).map(|i| (i, n.to_string())))
            .collect();

        Table {
            columns: picked.iter().map(|(_, n)| n.clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|r| picked.iter().map(|(i, _)| r[*i].clone()).collect())
                .collect(),
        }
    }

    /// Set every value of `name` to `fill`, appending the column if absent.
    pub fn add_column(&mut self, name: &str, fill: Cell) {
        match self.column_index(name) {
            Some(idx) => {
                for row in &mut self.rows {
                    row[idx] = fill.clone();
                }
            }
            None => {
                self.columns.push(name.to_string());
                for row in &mut self.rows {
                    row.push(fill.clone());
                }
            }
        }
    }

    /// Append a column computed from each row. Replaces an existing column
    /// of the same name.
    pub fn derive_column(&mut self, name: &str, mut f: impl FnMut(&Table, usize) -> Cell) {
        let this: &Table = self;
        let values: Vec<Cell> = (0..this.rows.len()).map(|i| f(this, i)).collect();
        let idx = match self.column_index(name) {
            Some(idx) => idx,
            None => {
                self.columns.push(name.to_string());
                for row in &mut self.rows {
                    row.push(Cell::Null);
                }
                self.columns.len() - 1
            }
        };
        for (row, value) in self.rows.iter_mut().zip(values) {
            row[idx] = value;
        }
    }

    /// Rewrite every value of `name`. Returns false when the column is absent.
    pub fn map_column(&mut self, name: &str, mut f: impl FnMut(&Cell) -> Cell) -> bool {
        let Some(idx) = self.column_index(name) else {
            return false;
        };
        for row in &mut self.rows {
            row[idx] = f(&row[idx]);
        }
        true
    }

    /// Coerce a column to its string key form (see [`Cell::to_key`]).
    pub fn stringify_column(&mut self, name: &str) -> bool {
        self.map_column(name, |c| c.to_key().map(Cell::Text).unwrap_or(Cell::Null))
    }

    /// Parse a column to date/time. Unparseable values become `Null`.
    pub fn parse_datetime_column(&mut self, name: &str) -> bool {
        self.map_column(name, |c| match c {
            Cell::DateTime(_) => c.clone(),
            Cell::Text(s) => parse_datetime(s).map(Cell::DateTime).unwrap_or(Cell::Null),
            _ => Cell::Null,
        })
    }

    /// A column is date/time typed when every non-null value is a `DateTime`.
    pub fn column_is_datetime(&self, name: &str) -> bool {
        match self.column_values(name) {
            Some(values) => values
                .iter()
                .all(|c| matches!(c, Cell::Null | Cell::DateTime(_))),
            None => false,
        }
    }

    /// Format a date/time typed column with a strftime pattern. Leaves the
    /// column untouched (and returns false) if it is absent or not date/time.
    pub fn format_datetime_column(&mut self, name: &str, pattern: &str) -> bool {
        if !self.column_is_datetime(name) {
            return false;
        }
        self.map_column(name, |c| match c {
            Cell::DateTime(dt) => Cell::Text(dt.format(pattern).to_string()),
            other => other.clone(),
        })
    }

    /// Relational left-outer join on `left_key == right_key`.
    ///
    /// Every left row is kept. A left row matching N right rows yields N
    /// output rows; one matching none yields a single row padded with
    /// `Null`. Right-side columns whose name collides with a left column get
    /// `suffix` appended. Null keys never match.
    pub fn left_join(
        &self,
        right: &Table,
        left_key: &str,
        right_key: &str,
        suffix: &str,
    ) -> Result<Table, ReconcileError> {
        let lk = self
            .column_index(left_key)
            .ok_or_else(|| ReconcileError::MissingColumn(left_key.to_string()))?;
        let rk = right
            .column_index(right_key)
            .ok_or_else(|| ReconcileError::MissingColumn(right_key.to_string()))?;

        let mut by_key: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, row) in right.rows.iter().enumerate() {
            if let Some(key) = row[rk].to_key() {
                by_key.entry(key).or_default().push(i);
            }
        }

        let mut columns = self.columns.clone();
        for c in &right.columns {
            let name = if self.has_column(c) {
                format!("{}{}", c, suffix)
            } else {
                c.clone()
            };
            if columns.contains(&name) {
                return Err(ReconcileError::DuplicateColumn(name));
            }
            columns.push(name);
        }

        let padding = vec![Cell::Null; right.columns.len()];
        let mut rows = Vec::with_capacity(self.rows.len());
        for left in &self.rows {
            let matches = left[lk].to_key().and_then(|k| by_key.get(&k));
            match matches {
                Some(indices) => {
                    for &ri in indices {
                        let mut row = left.clone();
                        row.extend(right.rows[ri].iter().cloned());
                        rows.push(row);
                    }
                }
                None => {
                    let mut row = left.clone();
                    row.extend(padding.iter().cloned());
                    rows.push(row);
                }
            }
        }

        Ok(Table { columns, rows })
    }

    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(c, v)| (c.clone(), v.to_json()))
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records(v: Value) -> Vec<Map<String, Value>> {
        v.as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().unwrap().clone())
            .collect()
    }

    #[test]
    fn test_from_records_first_seen_column_order() {
        let t = Table::from_records(&records(json!([
            {"ID": "1", "TITLE": "a"},
            {"ID": "2", "STAGE_NAME": "NEW"}
        ])));
        assert_eq!(t.columns(), &["ID", "TITLE", "STAGE_NAME"]);
        assert_eq!(t.get(0, "STAGE_NAME"), Some(&Cell::Null));
        assert_eq!(t.get(1, "TITLE"), Some(&Cell::Null));
        assert_eq!(t.get(1, "STAGE_NAME"), Some(&Cell::text("NEW")));
    }

    #[test]
    fn test_cell_from_json() {
        assert_eq!(Cell::from_json(&json!(10)), Cell::Int(10));
        assert_eq!(Cell::from_json(&json!(1.5)), Cell::Float(1.5));
        assert_eq!(Cell::from_json(&json!(null)), Cell::Null);
        assert_eq!(Cell::from_json(&json!([1, 2])), Cell::text("[1,2]"));
    }

    #[test]
    fn test_to_key_normalizes_numbers() {
        assert_eq!(Cell::Int(10).to_key().as_deref(), Some("10"));
        assert_eq!(Cell::Float(10.0).to_key().as_deref(), Some("10.0"));
        assert_eq!(Cell::Float(2.5).to_key().as_deref(), Some("2.5"));
        assert_eq!(Cell::text("10").to_key().as_deref(), Some("10"));
        assert_eq!(Cell::Null.to_key(), None);
    }

    #[test]
    fn test_parse_datetime_variants() {
        let expected = NaiveDate::from_ymd_opt(2025, 3, 15)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap();
        assert_eq!(parse_datetime("2025-03-15T14:30:00+03:00"), Some(expected));
        assert_eq!(parse_datetime("2025-03-15 14:30:00"), Some(expected));
        assert_eq!(parse_datetime("15/03/2025 14:30:00"), Some(expected));
        assert_eq!(
            parse_datetime("2025-03-15"),
            NaiveDate::from_ymd_opt(2025, 3, 15).unwrap().and_hms_opt(0, 0, 0)
        );
        assert_eq!(parse_datetime("not a date"), None);
        assert_eq!(parse_datetime(""), None);
    }

    #[test]
    fn test_left_join_keeps_unmatched_and_suffixes_collisions() {
        let left = Table::from_records(&records(json!([
            {"ID": "5", "TITLE": "five"},
            {"ID": "6", "TITLE": "six"}
        ])));
        let right = Table::from_records(&records(json!([
            {"DEAL_ID": "6", "TITLE": "custom", "LINK": "x"}
        ])));

        let joined = left.left_join(&right, "ID", "DEAL_ID", "_uf").unwrap();
        assert_eq!(
            joined.columns(),
            &["ID", "TITLE", "DEAL_ID", "TITLE_uf", "LINK"]
        );
        assert_eq!(joined.len(), 2);
        assert_eq!(joined.get(0, "ID"), Some(&Cell::text("5")));
        assert_eq!(joined.get(0, "LINK"), Some(&Cell::Null));
        assert_eq!(joined.get(1, "TITLE"), Some(&Cell::text("six")));
        assert_eq!(joined.get(1, "TITLE_uf"), Some(&Cell::text("custom")));
    }

    #[test]
    fn test_left_join_duplicates_on_multiple_matches() {
        let left = Table::from_records(&records(json!([{"ID": "1"}])));
        let right = Table::from_records(&records(json!([
            {"DEAL_ID": "1", "V": "a"},
            {"DEAL_ID": "1", "V": "b"}
        ])));
        let joined = left.left_join(&right, "ID", "DEAL_ID", "_uf").unwrap();
        assert_eq!(joined.len(), 2);
        assert_eq!(joined.get(1, "V"), Some(&Cell::text("b")));
    }

    #[test]
    fn test_left_join_missing_key_is_error() {
        let left = Table::from_records(&records(json!([{"ID": "1"}])));
        let right = Table::from_records(&records(json!([{"X": "1"}])));
        let err = left.left_join(&right, "ID", "DEAL_ID", "_uf").unwrap_err();
        assert!(matches!(err, ReconcileError::MissingColumn(c) if c == "DEAL_ID"));
    }

    #[test]
    fn test_left_join_rejects_suffix_clash() {
        let left = Table::from_records(&records(json!([{"ID": "1", "TITLE": "a", "TITLE_uf": "b"}])));
        let right = Table::from_records(&records(json!([{"DEAL_ID": "1", "TITLE": "c"}])));
        let err = left.left_join(&right, "ID", "DEAL_ID", "_uf").unwrap_err();
        assert!(matches!(err, ReconcileError::DuplicateColumn(c) if c == "TITLE_uf"));
    }

    #[test]
    fn test_rename_select_and_backfill() {
        let mut t = Table::from_records(&records(json!([
            {"ID": 1, "STAGE_NAME": "NEW", "EXTRA": true}
        ])));
        t.rename_columns(&[("STAGE_NAME", "Fase"), ("MISSING", "Nope")]);
        assert_eq!(t.columns(), &["ID", "Fase", "EXTRA"]);

        let mut s = t.select(&["Fase", "ID", "MISSING"]);
        assert_eq!(s.columns(), &["Fase", "ID"]);

        s.add_column("Responsável", Cell::text(""));
        assert_eq!(s.get(0, "Responsável"), Some(&Cell::text("")));
    }

    #[test]
    fn test_datetime_parse_and_format() {
        let mut t = Table::from_records(&records(json!([
            {"D": "2025-01-02T03:04:05+00:00"},
            {"D": "garbage"}
        ])));
        assert!(!t.column_is_datetime("D"));
        assert!(t.parse_datetime_column("D"));
        assert!(t.column_is_datetime("D"));
        assert_eq!(t.get(1, "D"), Some(&Cell::Null));

        assert!(t.format_datetime_column("D", "%d/%m/%Y %H:%M:%S"));
        assert_eq!(t.get(0, "D"), Some(&Cell::text("02/01/2025 03:04:05")));
        // Already text now: a second format is a no-op.
        assert!(!t.format_datetime_column("D", "%Y"));
    }

    #[test]
    fn test_push_row_width_checked() {
        let mut t = Table::new(vec!["A".into(), "B".into()]);
        assert!(t.push_row(vec![Cell::Int(1)]).is_err());
        assert!(t.push_row(vec![Cell::Int(1), Cell::Null]).is_ok());
        assert_eq!(t.len(), 1);
    }
}
