//! Table export: CSV (UTF-8 with BOM, for spreadsheet consumers) and JSON
//! (array of records).

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde_json::Value;

use crate::error::CacheError;
use crate::table::Table;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

/// Header row then one record per row. Null cells are written empty.
pub fn write_csv<W: Write>(table: &Table, mut writer: W, bom: bool) -> Result<(), CacheError> {
    if bom {
        writer.write_all(UTF8_BOM)?;
    }

    let mut csv_writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(writer);

    csv_writer.write_record(table.columns())?;
    for row in table.rows() {
        csv_writer.write_record(row.iter().map(|c| c.to_display()))?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn write_json<W: Write>(table: &Table, mut writer: W) -> Result<(), CacheError> {
    let records: Vec<Value> = table.to_records().into_iter().map(Value::Object).collect();
    serde_json::to_writer_pretty(&mut writer, &records)?;
    writeln!(writer)?;
    Ok(())
}

/// Write `table` to `path`, creating parent directories.
pub fn export_table(table: &Table, path: &Path, format: ExportFormat) -> Result<(), CacheError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
    }
    let file = File::create(path).map_err(|e| CacheError::io(path, e))?;
    let writer = BufWriter::new(file);
    match format {
        ExportFormat::Csv => write_csv(table, writer, true),
        ExportFormat::Json => write_json(table, writer),
    }
}
