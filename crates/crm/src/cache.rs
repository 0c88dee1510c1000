//! On-disk result cache.
//!
//! Each entry is `<dir>/<key>.json` holding the save time and the table.
//! Entries older than the configured duration are treated as absent; they
//! are not deleted on read.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::CacheError;
use crate::export::{export_table, ExportFormat};
use crate::table::Table;

pub const DEFAULT_CACHE_HOURS: i64 = 12;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    timestamp: DateTime<Utc>,
    table: Table,
}

/// `prefix_k1=v1_k2=v2` with parameters sorted by key.
pub fn generate_cache_key(prefix: &str, params: &[(&str, String)]) -> String {
    let mut params: Vec<&(&str, String)> = params.iter().collect();
    params.sort_by(|a, b| a.0.cmp(b.0));
    let joined: Vec<String> = params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}_{}", prefix, joined.join("_"))
}

#[derive(Debug, Clone)]
pub struct DataRepository {
    dir: PathBuf,
    backup_dir: PathBuf,
    duration: Duration,
}

impl DataRepository {
    pub fn new(dir: impl Into<PathBuf>, duration_hours: i64) -> Self {
        let dir = dir.into();
        let backup_dir = dir.join("backups");
        Self {
            dir,
            backup_dir,
            duration: Duration::hours(duration_hours),
        }
    }

    pub fn with_backup_dir(mut self, backup_dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = backup_dir.into();
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    pub fn save(&self, table: &Table, key: &str) -> Result<(), CacheError> {
        self.save_at(table, key, Utc::now())
    }

    pub fn save_at(&self, table: &Table, key: &str, now: DateTime<Utc>) -> Result<(), CacheError> {
        if table.is_empty() {
            warn!(key, "not caching an empty table");
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;

        let path = self.entry_path(key);
        let entry = CacheEntry {
            timestamp: now,
            table: table.clone(),
        };
        let json = serde_json::to_string(&entry)?;
        std::fs::write(&path, json).map_err(|e| CacheError::io(&path, e))?;
        info!(key, rows = table.len(), "cached table");
        Ok(())
    }

    /// The cached table, or `None` when missing, expired or unreadable.
    pub fn load(&self, key: &str) -> Option<Table> {
        self.load_at(key, Utc::now())
    }

    pub fn load_at(&self, key: &str, now: DateTime<Utc>) -> Option<Table> {
        let path = self.entry_path(key);
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(key, "cache miss");
                return None;
            }
            Err(e) => {
                warn!(key, error = %e, "cannot read cache entry");
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&content) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "corrupt cache entry");
                return None;
            }
        };

        if now > entry.timestamp + self.duration {
            info!(key, saved = %entry.timestamp, "cache entry expired");
            return None;
        }
        info!(key, rows = entry.table.len(), "cache hit");
        Some(entry.table)
    }

    /// Remove one entry, or every entry when `key` is `None`. Returns the
    /// number of files removed.
    pub fn delete(&self, key: Option<&str>) -> Result<usize, CacheError> {
        if let Some(key) = key {
            let path = self.entry_path(key);
            return match std::fs::remove_file(&path) {
                Ok(()) => {
                    info!(key, "cache entry removed");
                    Ok(1)
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
                Err(e) => Err(CacheError::io(&path, e)),
            };
        }

        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(CacheError::io(&self.dir, e)),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry.map_err(|e| CacheError::io(&self.dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                std::fs::remove_file(&path).map_err(|e| CacheError::io(&path, e))?;
                removed += 1;
            }
        }
        info!(removed, "cache cleared");
        Ok(removed)
    }

    /// Export a non-empty table. Returns false when there was nothing to write.
    pub fn export(&self, table: &Table, path: &Path, format: ExportFormat) -> Result<bool, CacheError> {
        if table.is_empty() {
            warn!(path = %path.display(), "not exporting an empty table");
            return Ok(false);
        }
        export_table(table, path, format)?;
        info!(path = %path.display(), format = format.extension(), "table exported");
        Ok(true)
    }

    /// Write a timestamped JSON snapshot into the backup directory.
    pub fn backup(&self, table: &Table, description: Option<&str>) -> Result<Option<PathBuf>, CacheError> {
        if table.is_empty() {
            warn!("not backing up an empty table");
            return Ok(None);
        }
        let description = description
            .filter(|d| !d.trim().is_empty())
            .map(|d| d.replace(' ', "_"))
            .unwrap_or_else(|| "backup".to_string());
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = self.backup_dir.join(format!("{}_{}.json", description, stamp));

        export_table(table, &path, ExportFormat::Json)?;
        info!(path = %path.display(), "backup written");
        Ok(Some(path))
    }
}
