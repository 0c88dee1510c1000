//! Post-processing of the combined deal table: meeting details parsed out
//! of free text, link cleanup, stage grouping and age metrics.
//!
//! Each step is a no-op (with a warning) when its input column is absent.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use crate::columns::{DISPLAY_CREATED, DISPLAY_MODIFIED, DISPLAY_STAGE};
use crate::table::{parse_datetime, Cell, Table};

pub const MEETING_COLUMN: &str = "REUNIÃO";
pub const LINK_COLUMN: &str = "LINK ARVORE DA FAMÍLIA PLATAFORMA";
pub const CLOSED_COLUMN: &str = "FECHADO";

const MIN_LINK_CHARS: usize = 6;

const SIGNING_STAGES: [&str; 3] = ["ASSINADO", "EM ASSINATURA", "VALIDADO ENVIAR FINANCEIRO"];
const NEGOTIATION_STAGES: [&str; 5] = [
    "EM NEGOCIAÇÃO",
    "ORÇAMENTO",
    "REUNIÃO REALIZADA",
    "VALIDANDO ADENDO",
    "CRIAR ADENDO",
];
const MEETING_STAGES: [&str; 1] = ["REUNIÃO AGENDADA"];
const CLOSING_STAGES: [&str; 2] = ["VALIDADO ENVIAR FINANCEIRO", "ASSINADO"];

static MEETING_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{2}/\d{2}/\d{4}|\bamanhã\b|\bhoje\b)").expect("meeting date pattern")
});
static MEETING_TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"de\s+(\d{2}:\d{2})\s+até").expect("meeting time pattern"));
static MEETING_OWNER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:REUNIÃO|:)\s*,\s*([^,]+)$").expect("meeting owner pattern")
});

/// Parsed pieces of a meeting description such as
/// `15/03/2025, de 14:00 até 15:00: REUNIÃO, Maria`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeetingDetails {
    pub date: Option<String>,
    pub time: Option<String>,
    pub owner: Option<String>,
}

pub fn parse_meeting(text: &str, today: NaiveDate) -> MeetingDetails {
    let date = MEETING_DATE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| match m.as_str() {
            "hoje" => today.format("%d/%m/%Y").to_string(),
            "amanhã" => (today + Duration::days(1)).format("%d/%m/%Y").to_string(),
            other => other.to_string(),
        });
    let time = MEETING_TIME
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    let owner = MEETING_OWNER
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string());

    MeetingDetails { date, time, owner }
}

fn opt_text(value: Option<String>) -> Cell {
    value.map(Cell::Text).unwrap_or(Cell::Null)
}

/// Adds `data_reuniao`, `hora_reuniao` and `responsavel_reuniao`.
pub fn extract_meeting_details(table: &mut Table, today: NaiveDate) {
    let Some(idx) = table.column_index(MEETING_COLUMN) else {
        warn!(column = MEETING_COLUMN, "column missing; skipping meeting details");
        return;
    };

    let details: Vec<MeetingDetails> = table
        .rows()
        .iter()
        .map(|row| match &row[idx] {
            Cell::Text(s) if !s.is_empty() => parse_meeting(s, today),
            _ => MeetingDetails::default(),
        })
        .collect();

    table.derive_column("data_reuniao", |_, i| opt_text(details[i].date.clone()));
    table.derive_column("hora_reuniao", |_, i| opt_text(details[i].time.clone()));
    table.derive_column("responsavel_reuniao", |_, i| {
        opt_text(details[i].owner.clone())
    });
    info!(rows = details.len(), "meeting details extracted");
}

/// Blanks short or non-text links and flags links used by more than one deal.
pub fn clean_link_data(table: &mut Table) {
    if !table.map_column(LINK_COLUMN, |c| match c {
        Cell::Text(s) if s.chars().count() >= MIN_LINK_CHARS => c.clone(),
        _ => Cell::text(""),
    }) {
        warn!(column = LINK_COLUMN, "column missing; skipping link cleanup");
        return;
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    for cell in table.column_values(LINK_COLUMN).unwrap_or_default() {
        if let Cell::Text(s) = cell {
            if !s.is_empty() {
                *counts.entry(s.clone()).or_default() += 1;
            }
        }
    }

    table.derive_column("link_duplicado", |t, i| {
        let duplicated = matches!(
            t.get(i, LINK_COLUMN),
            Some(Cell::Text(s)) if counts.get(s).copied().unwrap_or(0) > 1
        );
        Cell::Bool(duplicated)
    });
    let duplicated = counts.values().filter(|&&n| n > 1).count();
    info!(duplicated, "link cleanup done");
}

fn stage_category(stage: &str) -> &'static str {
    if MEETING_STAGES.contains(&stage) {
        "Reunião"
    } else if NEGOTIATION_STAGES.contains(&stage) {
        "Negociação"
    } else if SIGNING_STAGES.contains(&stage) {
        "Assinatura"
    } else {
        "Outros"
    }
}

/// Adds `categoria_fase`, `tem_fechamento` and `fase_fechamento`.
pub fn create_stage_categories(table: &mut Table) {
    if !table.has_column(DISPLAY_STAGE) {
        warn!(column = DISPLAY_STAGE, "column missing; skipping stage categories");
        return;
    }

    table.derive_column("categoria_fase", |t, i| {
        let stage = t.get(i, DISPLAY_STAGE).and_then(Cell::as_text).unwrap_or("");
        Cell::text(stage_category(stage))
    });
    table.derive_column("tem_fechamento", |t, i| {
        Cell::Bool(!t.get(i, CLOSED_COLUMN).map(Cell::is_blank).unwrap_or(true))
    });
    table.derive_column("fase_fechamento", |t, i| {
        let stage = t.get(i, DISPLAY_STAGE).and_then(Cell::as_text).unwrap_or("");
        Cell::Bool(CLOSING_STAGES.contains(&stage))
    });
    info!("stage categories added");
}

fn cell_datetime(cell: Option<&Cell>) -> Option<NaiveDateTime> {
    match cell? {
        Cell::DateTime(dt) => Some(*dt),
        Cell::Text(s) => parse_datetime(s),
        _ => None,
    }
}

fn days_between(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    let days = (to - from).num_seconds() as f64 / 86_400.0;
    (days * 10.0).round() / 10.0
}

/// Adds `dias_aberto` (creation to `now`) and `dias_ate_fechamento`
/// (creation to the closing date), in days rounded to one decimal.
pub fn add_time_metrics(table: &mut Table, now: NaiveDateTime) {
    let required = [DISPLAY_CREATED, DISPLAY_MODIFIED, CLOSED_COLUMN];
    if let Some(missing) = required.iter().find(|c| !table.has_column(c)) {
        warn!(column = *missing, "column missing; skipping time metrics");
        return;
    }

    table.derive_column("dias_aberto", |t, i| {
        cell_datetime(t.get(i, DISPLAY_CREATED))
            .map(|created| Cell::Float(days_between(created, now)))
            .unwrap_or(Cell::Null)
    });
    table.derive_column("dias_ate_fechamento", |t, i| {
        let created = cell_datetime(t.get(i, DISPLAY_CREATED));
        let closed = cell_datetime(t.get(i, CLOSED_COLUMN));
        match (created, closed) {
            (Some(created), Some(closed)) => Cell::Float(days_between(created, closed)),
            _ => Cell::Null,
        }
    });
    info!("time metrics added");
}

/// Every post-processing step, in order. Empty tables pass through.
pub fn process_data(mut table: Table, now: NaiveDateTime) -> Table {
    if table.is_empty() {
        warn!("empty table; nothing to process");
        return table;
    }
    extract_meeting_details(&mut table, now.date());
    clean_link_data(&mut table);
    create_stage_categories(&mut table);
    add_time_metrics(&mut table, now);
    info!(rows = table.len(), columns = table.columns().len(), "processing complete");
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
    }

    fn table(v: Value) -> Table {
        let records: Vec<Map<String, Value>> = v
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().unwrap().clone())
            .collect();
        Table::from_records(&records)
    }

    #[test]
    fn test_parse_meeting_full() {
        let d = parse_meeting("15/03/2025, de 14:00 até 15:00: REUNIÃO, Maria", today());
        assert_eq!(d.date.as_deref(), Some("15/03/2025"));
        assert_eq!(d.time.as_deref(), Some("14:00"));
        assert_eq!(d.owner.as_deref(), Some("Maria"));
    }

    #[test]
    fn test_parse_meeting_relative_days() {
        let d = parse_meeting("amanhã, de 09:30 até 10:00: REUNIÃO, João", today());
        assert_eq!(d.date.as_deref(), Some("11/03/2025"));
        assert_eq!(d.time.as_deref(), Some("09:30"));
        let d = parse_meeting("hoje, de 09:30 até 10:00", today());
        assert_eq!(d.date.as_deref(), Some("10/03/2025"));
        assert_eq!(d.owner, None);
    }

    #[test]
    fn test_extract_meeting_details_columns() {
        let mut t = table(json!([
            {"REUNIÃO": "15/03/2025, de 14:00 até 15:00: REUNIÃO, Maria"},
            {"REUNIÃO": ""}
        ]));
        extract_meeting_details(&mut t, today());
        assert_eq!(t.get(0, "responsavel_reuniao"), Some(&Cell::text("Maria")));
        assert_eq!(t.get(1, "data_reuniao"), Some(&Cell::Null));
    }

    #[test]
    fn test_clean_links_and_flag_duplicates() {
        let mut t = table(json!([
            {"LINK ARVORE DA FAMÍLIA PLATAFORMA": "https://a"},
            {"LINK ARVORE DA FAMÍLIA PLATAFORMA": "https://a"},
            {"LINK ARVORE DA FAMÍLIA PLATAFORMA": "x"},
            {"LINK ARVORE DA FAMÍLIA PLATAFORMA": "x"},
            {"LINK ARVORE DA FAMÍLIA PLATAFORMA": null}
        ]));
        clean_link_data(&mut t);
        assert_eq!(t.get(2, LINK_COLUMN), Some(&Cell::text("")));
        assert_eq!(t.get(4, LINK_COLUMN), Some(&Cell::text("")));
        assert_eq!(t.get(0, "link_duplicado"), Some(&Cell::Bool(true)));
        // Blanked links never count as duplicates.
        assert_eq!(t.get(2, "link_duplicado"), Some(&Cell::Bool(false)));
    }

    #[test]
    fn test_stage_categories() {
        let mut t = table(json!([
            {"Fase": "ASSINADO", "FECHADO": "2025-01-01"},
            {"Fase": "ORÇAMENTO", "FECHADO": ""},
            {"Fase": "REUNIÃO AGENDADA", "FECHADO": null},
            {"Fase": "NOVO", "FECHADO": ""}
        ]));
        create_stage_categories(&mut t);
        let cats: Vec<&Cell> = t.column_values("categoria_fase").unwrap();
        assert_eq!(
            cats,
            vec![
                &Cell::text("Assinatura"),
                &Cell::text("Negociação"),
                &Cell::text("Reunião"),
                &Cell::text("Outros")
            ]
        );
        assert_eq!(t.get(0, "tem_fechamento"), Some(&Cell::Bool(true)));
        assert_eq!(t.get(1, "tem_fechamento"), Some(&Cell::Bool(false)));
        assert_eq!(t.get(0, "fase_fechamento"), Some(&Cell::Bool(true)));
        assert_eq!(t.get(1, "fase_fechamento"), Some(&Cell::Bool(false)));
    }

    #[test]
    fn test_time_metrics() {
        let now = NaiveDate::from_ymd_opt(2025, 1, 11)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let mut t = table(json!([
            {"Criado": "01/01/2025 00:00:00", "Modificado": "", "FECHADO": "2025-01-04"},
            {"Criado": "01/01/2025 00:00:00", "Modificado": "", "FECHADO": ""}
        ]));
        add_time_metrics(&mut t, now);
        assert_eq!(t.get(0, "dias_aberto"), Some(&Cell::Float(10.5)));
        assert_eq!(t.get(0, "dias_ate_fechamento"), Some(&Cell::Float(3.0)));
        assert_eq!(t.get(1, "dias_ate_fechamento"), Some(&Cell::Null));
    }

    #[test]
    fn test_missing_columns_are_noops() {
        let mut t = table(json!([{"ID": "1"}]));
        let before = t.clone();
        extract_meeting_details(&mut t, today());
        clean_link_data(&mut t);
        create_stage_categories(&mut t);
        add_time_metrics(&mut t, today().and_hms_opt(0, 0, 0).unwrap());
        assert_eq!(t, before);
    }
}
