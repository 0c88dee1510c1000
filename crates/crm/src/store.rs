//! SQL-backed metrics store.
//!
//! The dashboard's family-registration metrics live in a relational store.
//! Queries are supplied by the caller; this module only runs them and maps
//! results into [`Table`]s. Failures are logged and come back as `None`.

use std::path::Path;

use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use tracing::{debug, error};

use crate::error::StoreError;
use crate::table::{Cell, Table};

pub trait MetricsStore {
    /// Run `query` with positional `params`. `None` on any failure.
    fn execute_query(&self, query: &str, params: &[Cell]) -> Option<Table>;
}

impl ToSql for Cell {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Cell::Null => ToSqlOutput::Owned(SqlValue::Null),
            Cell::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Cell::Int(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Cell::Float(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Cell::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
            Cell::DateTime(dt) => {
                ToSqlOutput::Owned(SqlValue::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string()))
            }
        })
    }
}

fn cell_from_sql(value: ValueRef<'_>) -> Cell {
    match value {
        ValueRef::Null => Cell::Null,
        ValueRef::Integer(i) => Cell::Int(i),
        ValueRef::Real(f) => Cell::Float(f),
        ValueRef::Text(t) | ValueRef::Blob(t) => Cell::Text(String::from_utf8_lossy(t).into_owned()),
    }
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            conn: Connection::open(path)?,
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Run statements that return no rows (schema setup, inserts).
    pub fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    pub fn query(&self, query: &str, params: &[Cell]) -> Result<Table, StoreError> {
        let mut stmt = self.conn.prepare(query)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let width = columns.len();

        let rows = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                (0..width)
                    .map(|i| row.get_ref(i).map(cell_from_sql))
                    .collect::<rusqlite::Result<Vec<Cell>>>()
            })?
            .collect::<rusqlite::Result<Vec<Vec<Cell>>>>()?;

        let mut table = Table::new(columns);
        for row in rows {
            table.push_row(row)?;
        }
        debug!(rows = table.len(), "metrics query returned");
        Ok(table)
    }
}

impl MetricsStore for SqliteStore {
    fn execute_query(&self, query: &str, params: &[Cell]) -> Option<Table> {
        match self.query(query, params) {
            Ok(table) => Some(table),
            Err(e) => {
                error!(error = %e, "metrics query failed");
                None
            }
        }
    }
}
