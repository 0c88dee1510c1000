//! Column names: runtime resolution of identifier columns whose spelling
//! varies between responses, plus the fixed custom-field and display-name
//! tables.

use tracing::info;

use crate::table::Table;

// ── Logical columns ─────────────────────────────────────────────────

/// A logical field with its canonical name and the fallback spellings
/// accepted in its place, checked in order.
#[derive(Debug, Clone, Copy)]
pub struct LogicalColumn {
    pub canonical: &'static str,
    pub fallbacks: &'static [&'static str],
}

pub const DEAL_ID: LogicalColumn = LogicalColumn {
    canonical: "ID",
    fallbacks: &["id"],
};

pub const CUSTOM_DEAL_ID: LogicalColumn = LogicalColumn {
    canonical: "DEAL_ID",
    fallbacks: &["deal_id", "ID_DEAL", "id_deal", "Deal_ID"],
};

/// The actual column a logical field was found under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedColumn {
    pub canonical: &'static str,
    pub actual: String,
}

impl LogicalColumn {
    /// First-match lookup: the canonical name, then each fallback.
    pub fn resolve(&self, table: &Table) -> Option<ResolvedColumn> {
        std::iter::once(self.canonical)
            .chain(self.fallbacks.iter().copied())
            .find(|name| table.has_column(name))
            .map(|name| ResolvedColumn {
                canonical: self.canonical,
                actual: name.to_string(),
            })
    }
}

impl ResolvedColumn {
    pub fn is_fallback(&self) -> bool {
        self.actual != self.canonical
    }

    /// Rename the actual column to the canonical name.
    pub fn apply(&self, table: &mut Table) {
        if self.is_fallback() {
            info!(
                column = %self.actual,
                canonical = self.canonical,
                "using fallback column name"
            );
            table.rename_column(&self.actual, self.canonical);
        }
    }
}

// ── Custom fields ───────────────────────────────────────────────────

/// A CRM custom field: opaque code, internal name, display header.
#[derive(Debug, Clone, Copy)]
pub struct CustomField {
    pub code: &'static str,
    pub logical: &'static str,
    pub display: &'static str,
}

pub const CUSTOM_FIELDS: [CustomField; 3] = [
    CustomField {
        code: "UF_CRM_1722605592778",
        logical: "LINK_ARVORE",
        display: "LINK ARVORE DA FAMÍLIA PLATAFORMA",
    },
    CustomField {
        code: "UF_CRM_1737689240946",
        logical: "REUNIAO",
        display: "REUNIÃO",
    },
    CustomField {
        code: "UF_CRM_1740458137391",
        logical: "DATA_FECHAMENTO",
        display: "FECHADO",
    },
];

/// Suffix appended to custom-field columns that collide with deal columns.
pub const COLLISION_SUFFIX: &str = "_uf";

// ── Display names ───────────────────────────────────────────────────

pub const DISPLAY_ID: &str = "ID";
pub const DISPLAY_CREATED: &str = "Criado";
pub const DISPLAY_MODIFIED: &str = "Modificado";
pub const DISPLAY_ASSIGNEE: &str = "Responsável";
pub const DISPLAY_STAGE: &str = "Fase";
pub const DISPLAY_TITLE: &str = "TÍTULO";

/// Deal column → display header.
pub const DEAL_DISPLAY_NAMES: [(&str, &str); 6] = [
    ("ID", DISPLAY_ID),
    ("DATE_CREATE", DISPLAY_CREATED),
    ("DATE_MODIFY", DISPLAY_MODIFIED),
    ("ASSIGNED_BY_NAME", DISPLAY_ASSIGNEE),
    ("STAGE_NAME", DISPLAY_STAGE),
    ("TITLE", DISPLAY_TITLE),
];

/// Columns present in every combined output, backfilled when missing.
pub const ESSENTIAL_COLUMNS: [&str; 3] = [DISPLAY_ID, DISPLAY_ASSIGNEE, DISPLAY_STAGE];

/// Columns parsed to date/time after the merge.
pub const DATE_COLUMNS: [&str; 5] = [
    "DATE_CREATE",
    "DATE_MODIFY",
    "CLOSEDATE",
    "DATE_CREATE_uf",
    "CLOSEDATE_uf",
];

pub fn custom_code_renames() -> Vec<(&'static str, &'static str)> {
    CUSTOM_FIELDS.iter().map(|f| (f.code, f.logical)).collect()
}

/// Full display rename map for the combined table, covering custom fields
/// with and without the collision suffix.
pub fn display_renames() -> Vec<(String, &'static str)> {
    let mut map: Vec<(String, &'static str)> = DEAL_DISPLAY_NAMES
        .iter()
        .map(|(from, to)| (from.to_string(), *to))
        .collect();
    for f in &CUSTOM_FIELDS {
        map.push((f.logical.to_string(), f.display));
    }
    for f in &CUSTOM_FIELDS {
        map.push((format!("{}{}", f.logical, COLLISION_SUFFIX), f.display));
    }
    map
}
