// Connection resolution
//
// Combines command-line overrides, environment variables and the settings
// file into the values the CRM client is constructed with. Resolved once at
// startup; nothing downstream reads the environment.

use std::time::Duration;

use tracing::warn;

use crate::secrets::{keychain_token, resolve_token, TokenLookup};
use crate::settings::{Settings, DEFAULT_CATEGORY_ID};

pub const BASE_URL_ENV: &str = "BITRIX_BASE_URL";
pub const CATEGORY_ENV: &str = "BITRIX_CATEGORY_ID";

/// Where a resolved value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Environment,
    Settings,
    Default,
}

impl ValueSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueSource::Flag => "flag",
            ValueSource::Environment => "environment",
            ValueSource::Settings => "settings",
            ValueSource::Default => "default",
        }
    }
}

/// Values given explicitly on the command line
#[derive(Debug, Clone, Default)]
pub struct ConnectionOverrides {
    pub base_url: Option<String>,
    pub category_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConnection {
    /// `None` when no source provides an endpoint
    pub base_url: Option<String>,
    pub base_url_source: ValueSource,
    pub token: TokenLookup,
    pub category_id: i64,
    pub category_source: ValueSource,
    pub timeout: Duration,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Resolve with an explicit keychain value and environment lookup.
///
/// Base URL: flag, then `BITRIX_BASE_URL`, then settings.
/// Category: flag, then `BITRIX_CATEGORY_ID` (ignored if not an integer),
/// then settings, then 34.
pub fn resolve_connection_with(
    overrides: &ConnectionOverrides,
    settings: &Settings,
    keychain: Option<String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> ResolvedConnection {
    let (base_url, base_url_source) = if let Some(url) = non_empty(overrides.base_url.clone()) {
        (Some(url), ValueSource::Flag)
    } else if let Some(url) = non_empty(env_lookup(BASE_URL_ENV)) {
        (Some(url), ValueSource::Environment)
    } else if let Some(url) = non_empty(settings.base_url.clone()) {
        (Some(url), ValueSource::Settings)
    } else {
        (None, ValueSource::Default)
    };

    let env_category = env_lookup(CATEGORY_ENV).and_then(|v| {
        let parsed = v.trim().parse::<i64>().ok();
        if parsed.is_none() {
            warn!(value = %v, "ignoring non-integer {}", CATEGORY_ENV);
        }
        parsed
    });
    let (category_id, category_source) = if let Some(id) = overrides.category_id {
        (id, ValueSource::Flag)
    } else if let Some(id) = env_category {
        (id, ValueSource::Environment)
    } else if let Some(id) = settings.category_id {
        (id, ValueSource::Settings)
    } else {
        (DEFAULT_CATEGORY_ID, ValueSource::Default)
    };

    ResolvedConnection {
        base_url,
        base_url_source,
        token: resolve_token(keychain, &env_lookup),
        category_id,
        category_source,
        timeout: Duration::from_secs(settings.timeout_secs),
    }
}

/// Resolve against the real keychain and process environment.
pub fn resolve_connection(overrides: &ConnectionOverrides, settings: &Settings) -> ResolvedConnection {
    resolve_connection_with(overrides, settings, keychain_token(), |name| {
        std::env::var(name).ok()
    })
}
