//! Table output for every command: aligned text for terminals, CSV or JSON
//! for pipes and files.

use std::io::{self, Write};
use std::path::Path;

use clap::ValueEnum;
use dealboard_crm::export::{export_table, write_csv, write_json, ExportFormat};
use dealboard_crm::Table;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::CliError;

/// Widest a single column is drawn in `--format table`.
const MAX_COLUMN_WIDTH: usize = 40;
const COLUMN_GAP: &str = "  ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Csv,
    Json,
}

/// Write `table` to `out`, or to stdout when no path is given.
///
/// Files are always data files: `--format table` with `--out` writes CSV.
pub fn emit(table: &Table, format: OutputFormat, out: Option<&Path>) -> Result<(), CliError> {
    match out {
        Some(path) => {
            let export = match format {
                OutputFormat::Json => ExportFormat::Json,
                OutputFormat::Table | OutputFormat::Csv => ExportFormat::Csv,
            };
            export_table(table, path, export)
                .map_err(|e| CliError::io(format!("cannot write {}: {}", path.display(), e)))?;
            eprintln!("wrote {} rows to {}", table.len(), path.display());
            Ok(())
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            let result = match format {
                OutputFormat::Table => render_table(table, &mut handle).map_err(|e| e.to_string()),
                OutputFormat::Csv => write_csv(table, &mut handle, false).map_err(|e| e.to_string()),
                OutputFormat::Json => write_json(table, &mut handle).map_err(|e| e.to_string()),
            };
            result.map_err(|e| CliError::io(format!("cannot write to stdout: {}", e)))
        }
    }
}

/// Cut `s` to at most `width` display columns, marking the cut with "..".
fn fit(s: &str, width: usize) -> String {
    if s.width() <= width {
        return s.to_string();
    }
    let budget = width.saturating_sub(2);
    let mut used = 0;
    let mut cut = String::new();
    for ch in s.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        cut.push(ch);
    }
    if width >= 2 {
        cut.push_str("..");
    }
    cut
}

fn pad(s: &str, width: usize) -> String {
    let s = fit(s, width);
    let fill = width.saturating_sub(s.width());
    format!("{}{}", s, " ".repeat(fill))
}

pub fn render_table<W: Write>(table: &Table, w: &mut W) -> io::Result<()> {
    if table.columns().is_empty() {
        return writeln!(w, "(no rows)");
    }

    let cells: Vec<Vec<String>> = table
        .rows()
        .iter()
        .map(|row| row.iter().map(|c| c.to_display().replace('\n', " ")).collect())
        .collect();

    let widths: Vec<usize> = table
        .columns()
        .iter()
        .enumerate()
        .map(|(i, name)| {
            cells
                .iter()
                .map(|row| row[i].width())
                .chain(std::iter::once(name.width()))
                .max()
                .unwrap_or(0)
                .min(MAX_COLUMN_WIDTH)
        })
        .collect();

    let line = |values: Vec<String>| -> String {
        values.join(COLUMN_GAP).trim_end().to_string()
    };

    let header: Vec<String> = table
        .columns()
        .iter()
        .zip(&widths)
        .map(|(name, &width)| pad(name, width))
        .collect();
    writeln!(w, "{}", line(header))?;
    let rule: Vec<String> = widths.iter().map(|&width| "-".repeat(width)).collect();
    writeln!(w, "{}", line(rule))?;

    for row in &cells {
        let values: Vec<String> = row.iter().zip(&widths).map(|(v, &width)| pad(v, width)).collect();
        writeln!(w, "{}", line(values))?;
    }

    let n = table.len();
    writeln!(w, "({} row{})", n, if n == 1 { "" } else { "s" })
}
