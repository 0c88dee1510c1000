// Application settings
// Loaded from ~/.config/dealboard/settings.json

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_CATEGORY_ID: i64 = 34;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CACHE_HOURS: i64 = 12;
pub const DEFAULT_DAYS: i64 = 90;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // CRM endpoint
    #[serde(rename = "crm.baseUrl")]
    pub base_url: Option<String>,

    #[serde(rename = "crm.categoryId")]
    pub category_id: Option<i64>,

    #[serde(rename = "crm.timeoutSecs")]
    pub timeout_secs: u64,

    // Result cache
    #[serde(rename = "cache.dir")]
    pub cache_dir: Option<PathBuf>,

    #[serde(rename = "cache.durationHours")]
    pub cache_duration_hours: i64,

    // Data window
    #[serde(rename = "data.defaultDays")]
    pub default_days: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: None,
            category_id: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            cache_dir: None,
            cache_duration_hours: DEFAULT_CACHE_HOURS,
            default_days: DEFAULT_DAYS,
        }
    }
}

/// Drop lines starting with `//` so the file can carry comments.
fn strip_comments(contents: &str) -> String {
    contents
        .lines()
        .filter(|line| !line.trim().starts_with("//"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl Settings {
    /// Get the settings file path
    pub fn config_path() -> PathBuf {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dealboard");
        config_dir.join("settings.json")
    }

    /// Load settings from the default location, writing a commented
    /// default file on first run.
    pub fn load() -> Self {
        let path = Self::config_path();

        if !path.exists() {
            let settings = Self::default();
            settings.create_default_file(&path);
            return settings;
        }

        Self::load_from(&path)
    }

    /// Load settings from `path`, falling back to defaults
    pub fn load_from(path: &Path) -> Self {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no settings file; using defaults");
                return Self::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read settings file; using defaults");
                return Self::default();
            }
        };

        match serde_json::from_str(&strip_comments(&contents)) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot parse settings file; using defaults");
                Self::default()
            }
        }
    }

    /// Save current settings to `path`
    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }

        let json = serde_json::to_string_pretty(self).map_err(|e| e.to_string())?;

        fs::write(path, json).map_err(|e| e.to_string())
    }

    /// Cache directory: configured, else the platform cache dir.
    pub fn effective_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("dealboard")
        })
    }

    /// Create default settings file with comments
    fn create_default_file(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!(error = %e, "cannot create config directory");
                return;
            }
        }

        let default_config = r#"{
    // CRM reporting endpoint, e.g. "https://crm.example.com/bitrix/tools/biconnector/pbi.php"
    // The token is NOT stored here: use the system keychain or BITRIX_TOKEN
    "crm.baseUrl": null,
    // Deal pipeline (category) to report on; null = 34
    "crm.categoryId": null,
    "crm.timeoutSecs": 30,

    // Result cache; null dir = platform cache directory
    "cache.dir": null,
    "cache.durationHours": 12,

    // Days loaded when no date range is given
    "data.defaultDays": 90
}
"#;

        if let Err(e) = fs::write(path, default_config) {
            warn!(error = %e, "cannot write default settings.json");
        }
    }

    /// Get the config file path for display/opening
    pub fn config_path_display() -> String {
        Self::config_path().to_string_lossy().to_string()
    }
}
